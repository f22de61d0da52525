//! History command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use provisioner_core::domain::history::{HistoricJob, JOB_NAME_LABEL, REPOSITORY_LABEL};

use super::{colorize_phase, format_summary, print_status_details};
use crate::config::Config;

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List finished jobs, newest first
    List {
        /// Only show jobs of this repository
        #[arg(short, long)]
        repository: Option<String>,
    },
    /// Show one finished job
    Get {
        /// Historic job name
        name: String,
    },
}

pub async fn handle_history_command(command: HistoryCommands, config: &Config) -> Result<()> {
    match command {
        HistoryCommands::List { repository } => list_history(config, repository.as_deref()).await,
        HistoryCommands::Get { name } => get_history(config, &name).await,
    }
}

/// Keeps records of `repository` (all when `None`), newest first
fn select_records(mut records: Vec<HistoricJob>, repository: Option<&str>) -> Vec<HistoricJob> {
    if let Some(repository) = repository {
        records.retain(|record| {
            record.metadata.labels.get(REPOSITORY_LABEL).map(String::as_str) == Some(repository)
        });
    }
    records.sort_by(|a, b| b.status.finished.cmp(&a.status.finished));
    records
}

async fn list_history(config: &Config, repository: Option<&str>) -> Result<()> {
    let records: Vec<HistoricJob> = config
        .client()
        .list(&config.namespace)
        .await
        .context("Failed to list historic jobs")?;
    let records = select_records(records, repository);

    if records.is_empty() {
        println!("{}", "No finished jobs found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} finished job(s):", records.len()).bold());
    println!();
    for record in records {
        let job_name = record
            .metadata
            .labels
            .get(JOB_NAME_LABEL)
            .cloned()
            .unwrap_or_default();
        println!("  {} {}", "▸".cyan(), record.metadata.name);
        println!("    Job:        {} ({})", job_name, record.spec.action);
        println!("    Repository: {}", record.spec.repository.dimmed());
        println!("    Phase:      {}", colorize_phase(record.status.phase));
        if let Some(finished) = record.status.finished {
            println!(
                "    Finished:   {}",
                finished.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
        }
        println!("    Summary:    {}", format_summary(&record.status.summary));
        println!();
    }

    Ok(())
}

async fn get_history(config: &Config, name: &str) -> Result<()> {
    let record: HistoricJob = config
        .client()
        .get(&config.namespace, name)
        .await
        .with_context(|| format!("Failed to get historic job '{}'", name))?;

    println!("{}", "Finished Job:".bold());
    println!("  Name:        {}", record.metadata.name.cyan());
    println!("  Action:      {}", record.spec.action);
    println!("  Repository:  {}", record.spec.repository);
    print_status_details(&record.status);

    Ok(())
}
