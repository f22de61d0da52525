//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod history;
mod job;

pub use history::HistoryCommands;
pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use provisioner_core::domain::job::{JobPhase, JobStatus, JobSummary};

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Finished job records
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::History { command } => history::handle_history_command(command, config).await,
    }
}

/// Colorize a job phase for display
pub(crate) fn colorize_phase(phase: JobPhase) -> ColoredString {
    let text = phase.to_string();
    match phase {
        JobPhase::Pending => text.yellow(),
        JobPhase::Claimed | JobPhase::Running => text.cyan(),
        JobPhase::Succeeded => text.green(),
        JobPhase::Failed => text.red(),
        JobPhase::Expired => text.dimmed(),
    }
}

pub(crate) fn format_summary(summary: &JobSummary) -> String {
    format!(
        "{} created, {} updated, {} deleted, {} unchanged, {} error(s)",
        summary.created, summary.updated, summary.deleted, summary.unchanged, summary.errors
    )
}

/// Print the status block shared by live and historic jobs
pub(crate) fn print_status_details(status: &JobStatus) {
    println!("  Phase:       {}", colorize_phase(status.phase));
    if let Some(lease) = &status.lease {
        println!(
            "  Lease:       {} (until {})",
            lease.holder,
            lease.expires_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(message) = &status.message {
        println!("  Message:     {}", message);
    }
    println!("  Progress:    {:.0}%", status.progress);
    if let Some(started) = status.started {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(finished) = status.finished {
        println!("  Finished:    {}", finished.format("%Y-%m-%d %H:%M:%S"));
        if let Some(started) = status.started {
            let seconds = finished.signed_duration_since(started).num_seconds();
            println!("  Duration:    {}s", seconds);
        }
    }
    println!("  Summary:     {}", format_summary(&status.summary));

    if !status.summary.warnings.is_empty() {
        println!("\n{}", "Warnings:".bold());
        for warning in &status.summary.warnings {
            println!("  {} {}", "!".yellow(), warning);
        }
    }

    if !status.errors.is_empty() {
        println!("\n{}", "Errors:".bold());
        for error in &status.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !status.results.is_empty() {
        println!("\n{}", "Results:".bold());
        for result in &status.results {
            let name = match (&result.kind, &result.name) {
                (Some(kind), Some(name)) => format!(" ({}/{})", kind, name),
                _ => String::new(),
            };
            match &result.error {
                Some(error) => println!(
                    "  {:?} {}{}: {}",
                    result.action,
                    result.path,
                    name,
                    error.red()
                ),
                None => println!("  {:?} {}{}", result.action, result.path, name.dimmed()),
            }
        }
    }
}
