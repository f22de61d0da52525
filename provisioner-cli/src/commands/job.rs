//! Job command handlers
//!
//! Submits jobs and shows live job records.

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use colored::*;
use provisioner_core::domain::job::{
    DeleteJobOptions, ExportJobOptions, Job, JobAction, JobSpec, MigrateJobOptions,
    MoveJobOptions, SyncJobOptions,
};
use provisioner_core::dto::job::CreateJob;

use super::{colorize_phase, print_status_details};
use crate::config::Config;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a new job
    Create(CreateArgs),
    /// List live jobs
    List,
    /// Get job details
    Get {
        /// Job name
        name: String,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    /// pull, push, migrate, delete or move
    action: JobAction,

    /// Repository the job runs against
    #[arg(short, long)]
    repository: String,

    /// Job name; generated from the action when omitted
    #[arg(long)]
    name: Option<String>,

    /// Pull: only apply changes since the last synced revision
    #[arg(long)]
    incremental: bool,

    /// Push: directory prefix inside the repository
    #[arg(long)]
    path: Option<String>,

    /// Push/migrate: commit message
    #[arg(short, long)]
    message: Option<String>,

    /// Delete/move: files or directories (trailing `/`) to act on
    #[arg(long = "file")]
    files: Vec<String>,

    /// Move: destination directory
    #[arg(long)]
    target_path: Option<String>,

    /// Delete/move: branch or revision
    #[arg(long = "ref")]
    git_ref: Option<String>,
}

impl CreateArgs {
    /// Builds the job spec for the requested action
    fn spec(&self) -> Result<JobSpec> {
        let mut spec = JobSpec::new(self.action, self.repository.clone());
        match self.action {
            JobAction::Pull => {
                spec.pull = Some(SyncJobOptions {
                    incremental: self.incremental,
                });
            }
            JobAction::Push => {
                spec.push = Some(ExportJobOptions {
                    path: self.path.clone(),
                    message: self.message.clone(),
                });
            }
            JobAction::Migrate => {
                spec.migrate = Some(MigrateJobOptions {
                    message: self.message.clone(),
                });
            }
            JobAction::Delete => {
                if self.files.is_empty() {
                    bail!("delete jobs need at least one --file");
                }
                spec.delete = Some(DeleteJobOptions {
                    paths: self.files.clone(),
                    git_ref: self.git_ref.clone(),
                });
            }
            JobAction::Move => {
                if self.files.is_empty() {
                    bail!("move jobs need at least one --file");
                }
                let Some(target_path) = &self.target_path else {
                    bail!("move jobs need --target-path");
                };
                spec.move_files = Some(MoveJobOptions {
                    paths: self.files.clone(),
                    target_path: target_path.clone(),
                    git_ref: self.git_ref.clone(),
                });
            }
        }
        Ok(spec)
    }
}

/// Routes job subcommands to their respective handlers
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    match command {
        JobCommands::Create(args) => create_job(config, args).await,
        JobCommands::List => list_jobs(config).await,
        JobCommands::Get { name } => get_job(config, &name).await,
    }
}

async fn create_job(config: &Config, args: CreateArgs) -> Result<()> {
    let request = CreateJob {
        namespace: config.namespace.clone(),
        name: args.name.clone(),
        spec: args.spec()?,
    };

    let job = config
        .client()
        .create(&request.into_job())
        .await
        .context("Failed to create job")?;

    println!("{}", "✓ Job created".green().bold());
    println!("  Name:       {}", job.metadata.name.cyan());
    println!("  Action:     {}", job.spec.action);
    println!("  Repository: {}", job.spec.repository);

    Ok(())
}

async fn list_jobs(config: &Config) -> Result<()> {
    let mut jobs: Vec<Job> = config
        .client()
        .list(&config.namespace)
        .await
        .context("Failed to list jobs")?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
        return Ok(());
    }

    jobs.sort_by(|a, b| {
        a.metadata
            .creation_timestamp
            .cmp(&b.metadata.creation_timestamp)
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });

    println!("{}", format!("Found {} job(s):", jobs.len()).bold());
    println!();
    for job in jobs {
        print_job_summary(&job);
    }

    Ok(())
}

async fn get_job(config: &Config, name: &str) -> Result<()> {
    let job: Job = config
        .client()
        .get(&config.namespace, name)
        .await
        .with_context(|| format!("Failed to get job '{}'", name))?;

    println!("{}", "Job Details:".bold());
    println!("  Name:        {}", job.metadata.name.cyan());
    println!("  Action:      {}", job.spec.action);
    println!("  Repository:  {}", job.spec.repository);
    if let Some(created) = job.metadata.creation_timestamp {
        println!("  Created:     {}", created.format("%Y-%m-%d %H:%M:%S"));
    }
    print_status_details(&job.status);

    Ok(())
}

fn print_job_summary(job: &Job) {
    println!("  {} {}", "▸".cyan(), job.metadata.name);
    println!("    Action:     {}", job.spec.action);
    println!("    Repository: {}", job.spec.repository.dimmed());
    println!("    Phase:      {}", colorize_phase(job.status.phase));
    if let Some(lease) = &job.status.lease {
        println!("    Holder:     {}", lease.holder.dimmed());
    }
    if let Some(message) = &job.status.message {
        println!("    Message:    {}", message);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(action: JobAction) -> CreateArgs {
        CreateArgs {
            action,
            repository: "repo".to_string(),
            name: None,
            incremental: false,
            path: None,
            message: None,
            files: Vec::new(),
            target_path: None,
            git_ref: None,
        }
    }

    #[test]
    fn test_pull_spec_carries_incremental_flag() {
        let mut pull = args(JobAction::Pull);
        pull.incremental = true;
        let spec = pull.spec().unwrap();
        assert_eq!(spec, JobSpec::pull("repo", true));
    }

    #[test]
    fn test_delete_requires_files() {
        assert!(args(JobAction::Delete).spec().is_err());

        let mut delete = args(JobAction::Delete);
        delete.files = vec!["dashboards/a.json".to_string()];
        let spec = delete.spec().unwrap();
        assert_eq!(spec.delete.unwrap().paths, vec!["dashboards/a.json"]);
    }

    #[test]
    fn test_move_requires_target() {
        let mut moving = args(JobAction::Move);
        moving.files = vec!["dashboards/".to_string()];
        assert!(moving.spec().is_err());

        moving.target_path = Some("archive/".to_string());
        let spec = moving.spec().unwrap();
        assert_eq!(spec.move_files.unwrap().target_path, "archive/");
    }
}
