//! Job command handlers
//!
//! Submitting launches, listing and inspecting jobs, and cancelling them.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use launchpad_client::LaunchClient;
use launchpad_core::domain::job::{JobRecord, Stage};
use launchpad_core::domain::launch::{LaunchSpec, SourceRef};
use launchpad_core::dto::job::JobSummary;
use std::path::Path;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a launch from a YAML or JSON spec file
    Submit {
        /// Path to the launch spec
        file: String,

        /// Override the launch name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List all jobs
    List,
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Cancel a job
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Handle job commands
///
/// # Arguments
/// * `command` - The job command to execute
/// * `config` - The CLI configuration
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Submit { file, name } => submit_job(&client, &file, name).await,
        JobCommands::List => list_jobs(&client).await,
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Cancel { id } => cancel_job(&client, &id).await,
    }
}

/// Submit a launch spec file
async fn submit_job(client: &LaunchClient, path: &str, name: Option<String>) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read launch spec: {}", path))?;

    let mut spec = parse_spec(Path::new(path), &contents)?;
    if let Some(name) = name {
        spec = spec.named(name);
    }
    spec.validate()
        .map_err(|e| anyhow::anyhow!("Invalid launch spec: {}", e))?;

    let display_name = spec.display_name().to_string();
    let submitted = client
        .submit_launch(spec)
        .await
        .context("Failed to submit launch")?;

    println!("{}", "✓ Launch submitted".green().bold());
    println!("  ID:   {}", submitted.id.to_string().cyan());
    println!("  Name: {}", display_name);

    Ok(())
}

/// Parses a launch spec, as JSON for `.json` files and YAML otherwise
fn parse_spec(path: &Path, contents: &str) -> Result<LaunchSpec> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(contents).context("Failed to parse JSON launch spec")
    } else {
        serde_yaml::from_str(contents).context("Failed to parse YAML launch spec")
    }
}

/// List all jobs
async fn list_jobs(client: &LaunchClient) -> Result<()> {
    let jobs = client.list_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &LaunchClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let job = client.get_job(uuid).await?;

    print_job_details(&job);

    Ok(())
}

/// Request cancellation of a job
async fn cancel_job(client: &LaunchClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let accepted = match client.cancel_job(uuid).await {
        Ok(accepted) => accepted,
        Err(e) if e.is_conflict() => {
            println!("{}", format!("Job {} has already finished", uuid).yellow());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if accepted.stage == Stage::Cancelled {
        println!("{}", format!("✓ Job {} cancelled", uuid).green());
    } else {
        println!(
            "{}",
            format!("✓ Cancellation requested for job {} (was {})", uuid, accepted.stage).green()
        );
    }

    Ok(())
}

fn print_job_summary(job: &JobSummary) {
    println!("  {} {} {}", "▸".cyan(), job.name.bold(), job.id.to_string().dimmed());
    println!("    Stage:     {}", colorize_stage(job.stage));
    println!(
        "    Submitted: {}",
        job.submitted_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(image) = &job.image {
        println!("    Image:     {}", image.dimmed());
    }
    println!();
}

fn print_job_details(job: &JobRecord) {
    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.id.to_string().cyan());
    println!("  Name:      {}", job.spec.display_name());
    println!("  Stage:     {}", colorize_stage(job.stage));
    match &job.spec.source {
        SourceRef::Image { uri } => println!("  Image:     {}", uri),
        SourceRef::Context { uri, .. } => println!("  Context:   {}", uri),
    }
    println!("  Submitted: {}", job.submitted_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = job.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("  Duration:  {}s", seconds);
        }
    }

    if let Some(published) = &job.published {
        println!("  Published: {} ({})", published.reference, published.provider);
    } else if let Some(image) = &job.image {
        println!("  Built:     {}", image.reference);
    }

    if let Some(handle) = &job.handle {
        println!("  Workload:  {}", handle);
    }

    if job.cancel_requested && !job.is_terminal() {
        println!("  {}", "Cancellation pending".yellow());
    }

    if !job.history.is_empty() {
        println!("\n{}", "History:".bold());
        for transition in &job.history {
            let attempt = if transition.attempt > 1 {
                format!(" (attempt {})", transition.attempt)
            } else {
                String::new()
            };
            println!(
                "  {} {}{}{}",
                transition.at.format("%H:%M:%S").to_string().dimmed(),
                colorize_stage(transition.stage),
                attempt,
                transition
                    .note
                    .as_ref()
                    .map(|note| format!(": {}", note))
                    .unwrap_or_default()
            );
        }
    }

    if let Some(result) = &job.result {
        println!("\n{}", "Result:".bold());
        println!(
            "  Success: {}",
            if result.success {
                "✓".green()
            } else {
                "✗".red()
            }
        );
        println!("  Stage:   {}", result.stage);

        if let Some(error) = &result.error_message {
            println!("\n{}", "Error:".bold());
            println!("{}", error.red());
        }

        if result.remote_cleanup_required {
            println!(
                "\n{}",
                "⚠ The workload may still be running remotely and needs manual cleanup".yellow()
            );
        }
    }
}

fn colorize_stage(stage: Stage) -> colored::ColoredString {
    let text = stage.to_string();
    match stage {
        Stage::Queued => text.yellow(),
        Stage::Building | Stage::Pushing | Stage::Launching => text.blue(),
        Stage::Running => text.cyan(),
        Stage::Succeeded => text.green(),
        Stage::Failed => text.red(),
        Stage::Cancelled => text.dimmed(),
    }
}
