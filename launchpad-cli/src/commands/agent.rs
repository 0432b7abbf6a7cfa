//! Agent command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use launchpad_client::LaunchClient;

use crate::config::Config;

/// Agent subcommands
#[derive(Subcommand)]
pub enum AgentCommands {
    /// Show capacity and queue depth
    Stats,
    /// Stop admitting launches and shut the agent down
    Shutdown {
        /// Cancel active jobs instead of letting them finish
        #[arg(long)]
        now: bool,
    },
}

/// Handle agent commands
pub async fn handle_agent_command(command: AgentCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        AgentCommands::Stats => show_stats(&client).await,
        AgentCommands::Shutdown { now } => shutdown(&client, now).await,
    }
}

async fn show_stats(client: &LaunchClient) -> Result<()> {
    let stats = client.agent_stats().await?;

    let describe = |value: Option<usize>| match value {
        Some(n) => n.to_string(),
        None => "unbounded".to_string(),
    };

    println!("{}", "Agent:".bold());
    println!("  Active:     {}", stats.active.to_string().cyan());
    println!("  Queued:     {}", stats.queued.to_string().yellow());
    println!("  Capacity:   {}", describe(stats.capacity));
    println!("  Free slots: {}", describe(stats.free_slots));
    if stats.shutting_down {
        println!("  {}", "Shutting down".red());
    }

    Ok(())
}

async fn shutdown(client: &LaunchClient, now: bool) -> Result<()> {
    client.shutdown_agent(!now).await?;

    if now {
        println!("{}", "✓ Shutdown requested, active jobs are being cancelled".green());
    } else {
        println!("{}", "✓ Shutdown requested, active jobs will run to completion".green());
    }

    Ok(())
}
