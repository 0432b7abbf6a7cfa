//! Pipeline adapters
//!
//! One trait per pipeline role: `Builder` turns a spec into an image,
//! `Publisher` pushes it to a registry and `Runner` starts, polls and cancels
//! the workload. Implementations are chosen once at startup from the
//! configuration and shared by every job through an `AdapterSet`.
//!
//! Adapters never touch job records. They receive read-only inputs and return
//! their outcome to the scheduler, which owns all state.

pub mod kubernetes;
pub mod noop;
pub mod podman;

#[cfg(test)]
pub mod scripted;

use async_trait::async_trait;
use launchpad_core::domain::launch::LaunchSpec;
use launchpad_core::domain::run::{ImageRef, PublishedRef, RunHandle, RunStatus};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::{AgentConfig, BuildType, RegistryProvider, RunnerType};
use crate::error::{AdapterError, ConfigError};

/// Produces a container image for a launch
#[async_trait]
pub trait Builder: Send + Sync {
    /// Builder type name matched against `LaunchSpec::builder`
    fn kind(&self) -> &'static str;

    /// Builds the image for `spec`
    ///
    /// Retrying with the same arguments must produce an equivalent image.
    async fn build(&self, job_id: Uuid, spec: &LaunchSpec) -> Result<ImageRef, AdapterError>;
}

/// Pushes built images to a registry
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Registry provider name matched against `LaunchSpec::registry`
    fn provider(&self) -> &'static str;

    /// Makes `image` pullable from `target`
    ///
    /// Retrying must never leave a partially tagged image visible to consumers.
    async fn push(
        &self,
        job_id: Uuid,
        image: &ImageRef,
        target: &RegistryTarget,
    ) -> Result<PublishedRef, AdapterError>;
}

/// Starts and supervises workloads on an execution backend
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type name matched against `LaunchSpec::runner`
    fn kind(&self) -> &'static str;

    /// Starts the workload; launching the same job twice must not start two workloads
    async fn launch(
        &self,
        job_id: Uuid,
        image: &PublishedRef,
        spec: &LaunchSpec,
    ) -> Result<RunHandle, AdapterError>;

    /// Reports the backend's view of the workload
    async fn poll(&self, handle: &RunHandle) -> Result<RunStatus, AdapterError>;

    /// Asks the backend to stop the workload
    async fn cancel(&self, handle: &RunHandle) -> Result<(), AdapterError>;
}

/// Registry images are pushed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    pub provider: RegistryProvider,
    /// Repository reference without scheme; `None` for the local store
    pub url: Option<String>,
    pub region: Option<String>,
}

impl RegistryTarget {
    #[cfg(test)]
    pub fn local() -> Self {
        Self {
            provider: RegistryProvider::Local,
            url: None,
            region: None,
        }
    }

    /// Remote reference for an image named `name` with tag `tag`
    ///
    /// Every launch shares one repository, so the image name is folded into
    /// the tag.
    pub fn reference_for(&self, name: &str, tag: &str) -> Option<String> {
        self.url
            .as_deref()
            .map(|url| format!("{}:{}-{}", url.trim_end_matches('/'), name, tag))
    }
}

/// Adapters selected for this agent
#[derive(Clone)]
pub struct AdapterSet {
    pub builder: Arc<dyn Builder>,
    pub publisher: Arc<dyn Publisher>,
    pub runner: Arc<dyn Runner>,
    pub target: RegistryTarget,
}

impl AdapterSet {
    pub fn new(
        builder: Arc<dyn Builder>,
        publisher: Arc<dyn Publisher>,
        runner: Arc<dyn Runner>,
        target: RegistryTarget,
    ) -> Self {
        Self {
            builder,
            publisher,
            runner,
            target,
        }
    }

    /// Constructs the adapters named by the configuration
    ///
    /// A Kubernetes client is created only when a cluster-backed adapter is
    /// selected, using the in-cluster service account or local kubeconfig.
    pub async fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        let target = RegistryTarget {
            provider: config.registry.provider,
            url: config.registry.url.clone(),
            region: config.registry.region.clone(),
        };

        let needs_cluster = config.build.build_type == BuildType::Kaniko
            || config.runner.runner_type == RunnerType::Kubernetes;
        let client = if needs_cluster {
            Some(kube::Client::try_default().await.map_err(|e| {
                ConfigError::invalid(format!("failed to create kubernetes client: {}", e))
            })?)
        } else {
            None
        };

        let cluster = || {
            client
                .clone()
                .ok_or_else(|| ConfigError::invalid("kubernetes client is not configured"))
        };

        let builder: Arc<dyn Builder> = match config.build.build_type {
            BuildType::Noop => Arc::new(noop::NoopBuilder),
            BuildType::Podman => Arc::new(podman::PodmanBuilder::new(
                config.build.local_repository.clone(),
            )),
            BuildType::Kaniko => Arc::new(kubernetes::KanikoBuilder::new(
                cluster()?,
                &config.build,
                target.clone(),
            )),
        };

        let publisher: Arc<dyn Publisher> = match target.provider {
            RegistryProvider::Local => Arc::new(noop::LocalPublisher),
            provider => Arc::new(podman::PodmanPublisher::new(provider)),
        };

        let runner: Arc<dyn Runner> = match config.runner.runner_type {
            RunnerType::LocalContainer => Arc::new(podman::PodmanRunner::new(
                config.runner.output_location.clone(),
            )),
            RunnerType::Kubernetes => Arc::new(kubernetes::KubernetesRunner::new(
                cluster()?,
                &config.runner,
            )),
            other => {
                return Err(ConfigError::Unsupported {
                    kind: "runner type",
                    value: other.as_str().to_string(),
                });
            }
        };

        info!(
            "Adapters: builder={}, registry={}, runner={}",
            builder.kind(),
            publisher.provider(),
            runner.kind()
        );

        Ok(Self::new(builder, publisher, runner, target))
    }

    /// Rejects specs that ask for adapter types this agent does not run
    pub fn check_spec(&self, spec: &LaunchSpec) -> Result<(), AdapterError> {
        check_requested("builder", spec.builder.as_deref(), self.builder.kind())?;
        check_requested("registry", spec.registry.as_deref(), self.publisher.provider())?;
        check_requested("runner", spec.runner.as_deref(), self.runner.kind())
    }
}

fn check_requested(role: &str, requested: Option<&str>, actual: &str) -> Result<(), AdapterError> {
    match requested {
        Some(requested) if requested != actual => Err(AdapterError::terminal(format!(
            "unsupported {} type '{}' (agent provides '{}')",
            role, requested, actual
        ))),
        _ => Ok(()),
    }
}

/// Image name derived from the launch name, safe for registries and resource names
pub fn image_name(spec: &LaunchSpec) -> String {
    let mut name: String = spec
        .display_name()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name = name.trim_matches('-').to_string();
    name.truncate(40);
    let name = name.trim_end_matches('-');
    if name.is_empty() {
        "launch".to_string()
    } else {
        name.to_string()
    }
}

/// Deterministic per-job tag, so a retried build targets the same image
pub fn image_tag(job_id: Uuid) -> String {
    job_id.simple().to_string()[..12].to_string()
}

/// Backend resource name for a job's workload
pub fn workload_name(job_id: Uuid) -> String {
    format!("launch-{}", image_tag(job_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_name_is_sanitized() {
        let spec = LaunchSpec::from_image("alpine:3").named("Train ResNet/50 (v2)");
        assert_eq!(image_name(&spec), "train-resnet-50--v2");

        let spec = LaunchSpec::from_image("alpine:3").named("___");
        assert_eq!(image_name(&spec), "launch");
    }

    #[test]
    fn test_image_tag_is_stable() {
        let id = Uuid::parse_str("1a2b3c4d-5e6f-7a8b-9c0d-1e2f3a4b5c6d").unwrap();
        assert_eq!(image_tag(id), "1a2b3c4d5e6f");
        assert_eq!(workload_name(id), "launch-1a2b3c4d5e6f");
    }

    #[test]
    fn test_registry_reference() {
        let target = RegistryTarget {
            provider: RegistryProvider::Acr,
            url: Some("team.azurecr.io/launch/".to_string()),
            region: None,
        };
        assert_eq!(
            target.reference_for("train", "abc").as_deref(),
            Some("team.azurecr.io/launch:train-abc")
        );
        assert_eq!(RegistryTarget::local().reference_for("train", "abc"), None);
    }

    #[test]
    fn test_check_requested() {
        assert!(check_requested("builder", None, "noop").is_ok());
        assert!(check_requested("builder", Some("noop"), "noop").is_ok());

        let err = check_requested("builder", Some("kaniko"), "noop").unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("unsupported builder type 'kaniko'"));
    }
}
