//! Provisioner CLI
//!
//! Command-line interface for submitting provisioning jobs and inspecting
//! their history through the resource API.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "provisioner")]
#[command(about = "Provisioning job CLI", long_about = None)]
struct Cli {
    /// Resource API URL
    #[arg(
        long,
        env = "PROVISIONER_API_URL",
        default_value = "http://localhost:8080"
    )]
    api_url: String,

    /// Namespace the jobs live in
    #[arg(
        short,
        long,
        env = "PROVISIONER_NAMESPACE",
        default_value = "default"
    )]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        api_url: cli.api_url,
        namespace: cli.namespace,
    };

    handle_command(cli.command, &config).await
}
