//! Launchpad HTTP Client
//!
//! A small, typed HTTP client used by the CLI to drive a launch agent and by
//! the agent itself to talk to an upstream launch queue.
//!
//! # Example
//!
//! ```no_run
//! use launchpad_client::LaunchClient;
//! use launchpad_core::domain::launch::LaunchSpec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = LaunchClient::new("http://localhost:8080");
//!
//!     let submitted = client
//!         .submit_launch(LaunchSpec::from_image("alpine:3").named("hello"))
//!         .await?;
//!
//!     println!("Submitted job: {}", submitted.id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod queue;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// HTTP client for the launch agent API and the upstream launch queue
///
/// Methods are grouped by the service they target:
/// - Agent API: submit, status, cancel, capacity and shutdown
/// - Launch queue: registration, pending launches, acknowledgements, reports
///   and heartbeats
#[derive(Debug, Clone)]
pub struct LaunchClient {
    /// Base URL of the service (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

/// Error body returned by the agent API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl LaunchClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the service (e.g., "http://localhost:8080")
    ///
    /// # Example
    /// ```
    /// use launchpad_client::LaunchClient;
    ///
    /// let client = LaunchClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the service
    /// * `client` - A configured reqwest Client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::api_error(status.as_u16(), error_message(&error_text)))
    }
}

/// Extracts the message from a `{"error": "..."}` body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string())
}
