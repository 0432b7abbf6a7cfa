//! Launchpad CLI
//!
//! Command-line interface for driving a launch agent over its HTTP API.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Launchpad launch agent CLI", long_about = None)]
struct Cli {
    /// Agent URL
    #[arg(long, env = "LAUNCHPAD_AGENT_URL", default_value = "http://localhost:8080")]
    agent_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        agent_url: cli.agent_url,
    };

    handle_command(cli.command, &config).await
}
