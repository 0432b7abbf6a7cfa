//! Error taxonomy for the launch agent
//!
//! - `AdapterError`: failures reported by builders, publishers and runners,
//!   split into retryable and non-retryable
//! - `AgentError`: failures surfaced to callers of the scheduler
//! - `ConfigError`: invalid or unreadable configuration, fatal at startup

use launchpad_core::domain::job::Stage;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Error reported by an adapter operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Network, throttling, temporary resource exhaustion; safe to retry
    #[error("{0}")]
    Transient(String),

    /// Bad spec, authorization failure, unsupported type; never retried
    #[error("{0}")]
    Terminal(String),
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Error returned by the scheduler's public operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} is already {stage}")]
    AlreadyTerminal { id: Uuid, stage: Stage },

    #[error("agent is shutting down")]
    ShuttingDown,

    #[error("launch queue is full ({limit} pending)")]
    Capacity { limit: usize },

    #[error("invalid launch spec: {0}")]
    InvalidSpec(String),

    #[error("agent loop is not running")]
    Stopped,
}

/// Configuration error; aborts startup before any job is admitted
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unsupported {kind} '{value}'")]
    Unsupported { kind: &'static str, value: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_classification() {
        assert!(AdapterError::transient("connection reset").is_transient());
        assert!(!AdapterError::terminal("forbidden").is_transient());
        assert_eq!(AdapterError::terminal("forbidden").to_string(), "forbidden");
    }

    #[test]
    fn test_agent_error_messages() {
        let id = Uuid::nil();
        let err = AgentError::AlreadyTerminal {
            id,
            stage: Stage::Succeeded,
        };
        assert_eq!(err.to_string(), format!("job {} is already Succeeded", id));
        assert_eq!(
            AgentError::Capacity { limit: 4 }.to_string(),
            "launch queue is full (4 pending)"
        );
    }
}
