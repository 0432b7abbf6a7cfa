//! Launchpad Agent
//!
//! Accepts launch requests, builds and publishes their images and runs them
//! on the configured backend, never running more than `max-jobs` at once.
//!
//! Architecture:
//! - Configuration: YAML file plus environment overrides, validated at startup
//! - Adapters: builder, registry publisher and runner backends
//! - Scheduler: single-owner agent loop with a FIFO queue and a slot pool
//! - Queue: optional poller pulling launches from an upstream launch queue
//! - API: local HTTP endpoints for submit, status, cancel and shutdown

mod adapter;
mod api;
mod config;
mod error;
mod queue;
mod retry;
mod scheduler;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::adapter::AdapterSet;
use crate::api::AppState;
use crate::config::AgentConfig;
use crate::queue::{QueuePoller, QueueSettings};
use crate::scheduler::{Agent, ChannelSink, SchedulerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Launchpad Agent");

    // Load configuration
    let config = AgentConfig::load().context("Invalid agent configuration")?;
    info!(
        "Loaded configuration: agent_id={}, max_jobs={}, registry={}",
        config.agent_id,
        config.max_jobs,
        config.registry.provider.as_str()
    );

    // Initialize adapters
    let adapters = AdapterSet::from_config(&config)
        .await
        .context("Failed to initialize adapters")?;

    // Create the scheduler, with a result sink when an upstream queue is configured
    let (agent, handle) = Agent::new(SchedulerSettings::from(&config), adapters);
    let (agent, poller) = match QueueSettings::from_config(&config) {
        Some(settings) => {
            info!("Launch queue configured at {}", settings.base_url);
            let (sink, results) = ChannelSink::new();
            let poller = QueuePoller::new(settings, handle.clone(), results);
            (agent.with_sink(Arc::new(sink)), Some(poller))
        }
        None => {
            info!("No launch queue configured, accepting launches over the API only");
            (agent, None)
        }
    };
    let agent_task = agent.spawn();

    let intake = CancellationToken::new();
    let poller_task = poller.map(|poller| tokio::spawn(poller.run(intake.clone())));

    // Serve the local API
    let shutdown = CancellationToken::new();
    let app = api::create_router(AppState {
        agent: handle.clone(),
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.bind_addr))?;
    info!("Listening on {}", config.api.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("HTTP server error")?;

    // Drain: stop pulling work, let active jobs finish, report their results
    intake.cancel();
    info!("Waiting for active jobs to finish");
    if let Err(e) = handle.shutdown(true).await {
        warn!("Agent loop ended before shutdown completed: {}", e);
    }

    if let Some(task) = poller_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Launch queue poller failed: {:#}", e),
            Err(e) => error!("Launch queue poller panicked: {}", e),
        }
    }

    drop(handle);
    if let Err(e) = agent_task.await {
        error!("Agent loop panicked: {}", e);
    }

    info!("Launchpad Agent stopped");
    Ok(())
}

/// Initializes logging; `LAUNCHPAD_LOG_FORMAT=json` selects JSON output
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "launchpad_agent=info,tower_http=debug".into());
    let json = std::env::var("LAUNCHPAD_LOG_FORMAT").is_ok_and(|format| format == "json");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on ctrl-c or once a shutdown requested over the API completed
async fn shutdown_signal(api_shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        },
        _ = api_shutdown.cancelled() => info!("Shutdown requested over the API"),
    }
}
