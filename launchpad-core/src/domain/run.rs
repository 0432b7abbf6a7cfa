//! Artifacts produced while a launch moves through its pipeline

use serde::{Deserialize, Serialize};

/// Reference to a built container image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Full image reference (e.g. "localhost/launchpad/train:1a2b3c4d")
    pub reference: String,

    /// Whether the builder already pushed the image to its registry
    pub pushed: bool,
}

impl ImageRef {
    /// An image that only exists in the local image store
    pub fn local(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pushed: false,
        }
    }

    /// An image that is already available in a registry
    pub fn remote(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pushed: true,
        }
    }
}

/// Reference to an image the runner can pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRef {
    /// Pullable image reference
    pub reference: String,

    /// Registry provider that holds the image
    pub provider: String,
}

/// Handle to a launched workload
///
/// Returned by a runner on launch and used afterwards to poll or cancel it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    /// Runner backend that owns the workload (e.g. "kubernetes")
    pub backend: String,

    /// Backend-specific identifier (container name, job name, ...)
    pub id: String,

    /// Namespace the workload lives in, for namespaced backends
    pub namespace: Option<String>,
}

impl std::fmt::Display for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}://{}/{}", self.backend, ns, self.id),
            None => write!(f, "{}://{}", self.backend, self.id),
        }
    }
}

/// Status reported by a runner for a launched workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}
