//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod agent;
mod job;

pub use agent::AgentCommands;
pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Launch job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Agent capacity and lifecycle
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Agent { command } => agent::handle_agent_command(command, config).await,
    }
}
