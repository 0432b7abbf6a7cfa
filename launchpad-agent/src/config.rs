//! Agent configuration
//!
//! The agent reads a YAML file (path from `LAUNCHPAD_CONFIG`, default
//! `launch-config.yaml`), applies environment overrides on top of it and
//! validates the result before anything else starts. Each enumerated option
//! selects an adapter implementation; see `adapter::AdapterSet::from_config`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryConfig;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "launch-config.yaml";

/// Complete agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AgentConfig {
    /// Unique identifier for this agent instance
    pub agent_id: String,

    /// Upstream launch queue (e.g., "https://api.example.com"); disables polling when unset
    pub base_url: Option<String>,

    /// Project whose launch queue the agent serves
    pub project: Option<String>,

    /// Concurrency cap; negative means unbounded
    pub max_jobs: i64,

    /// Bound on jobs waiting for a slot; unbounded when unset
    pub max_queue: Option<usize>,

    pub registry: RegistryConfig,
    pub build: BuildConfig,
    pub runner: RunnerConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
}

/// Registry provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryProvider {
    /// Images stay in the local image store
    #[default]
    Local,
    Generic,
    Ecr,
    Gcr,
    Acr,
}

impl RegistryProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryProvider::Local => "local",
            RegistryProvider::Generic => "generic",
            RegistryProvider::Ecr => "ecr",
            RegistryProvider::Gcr => "gcr",
            RegistryProvider::Acr => "acr",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    /// Repository URL images are pushed to
    pub url: Option<String>,
    pub provider: RegistryProvider,
    pub region: Option<String>,
}

/// Builder type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildType {
    /// Prebuilt images only
    #[default]
    Noop,
    /// `podman build` on the agent host
    Podman,
    /// Kaniko executor running as a Kubernetes Job
    Kaniko,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Noop => "noop",
            BuildType::Podman => "podman",
            BuildType::Kaniko => "kaniko",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BuildConfig {
    #[serde(rename = "type")]
    pub build_type: BuildType,

    /// Cloud provider hosting the build context store (e.g. "aws")
    pub cloud_provider: Option<String>,

    /// Base URL that relative build contexts are resolved against
    pub build_context_store: Option<String>,

    /// Namespace for in-cluster build jobs
    pub namespace: Option<String>,

    /// Executor image for in-cluster builds
    pub image: String,

    /// Local repository prefix for images built on the agent host
    pub local_repository: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_type: BuildType::Noop,
            cloud_provider: None,
            build_context_store: None,
            namespace: None,
            image: "gcr.io/kaniko-project/executor:v1.23.2".to_string(),
            local_repository: "localhost/launchpad".to_string(),
        }
    }
}

/// Runner type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerType {
    #[default]
    LocalContainer,
    Kubernetes,
    /// Managed training-job services; recognized but without a backend
    Sagemaker,
    Vertex,
}

impl RunnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerType::LocalContainer => "local-container",
            RunnerType::Kubernetes => "kubernetes",
            RunnerType::Sagemaker => "sagemaker",
            RunnerType::Vertex => "vertex",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunnerConfig {
    #[serde(rename = "type")]
    pub runner_type: RunnerType,

    /// Identity the workload runs as (service account for Kubernetes)
    #[serde(alias = "service-account")]
    pub role: Option<String>,

    /// Default output location exported to workloads
    pub output_location: Option<String>,

    /// Target namespace for launched jobs
    pub namespace: Option<String>,
}

/// When a job gives its slot back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotRelease {
    /// Slot held from admission until the terminal stage
    #[default]
    OnTerminal,
    /// Slot released once the workload is running
    OnRunning,
}

/// Per-stage maximum durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StageTimeouts {
    pub build_secs: u64,
    pub push_secs: u64,
    pub launch_secs: u64,
    /// Bound on a single status poll
    pub poll_secs: u64,
    /// Bound on the whole running stage
    pub run_secs: Option<u64>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            build_secs: 3600,
            push_secs: 900,
            launch_secs: 300,
            poll_secs: 60,
            run_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchedulerConfig {
    pub slot_release: SlotRelease,

    /// Interval between status polls of a running workload
    pub poll_interval_secs: u64,

    /// How long a cancellation may take before the slot is force-released
    pub cancel_grace_secs: u64,

    /// Terminal records kept for status queries
    pub history_limit: usize,

    /// Interval between upstream queue polls
    pub queue_poll_interval_secs: u64,

    /// Interval between upstream heartbeats
    pub heartbeat_interval_secs: u64,

    pub retry: RetryConfig,
    pub timeouts: StageTimeouts,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_release: SlotRelease::OnTerminal,
            poll_interval_secs: 5,
            cancel_grace_secs: 30,
            history_limit: 500,
            queue_poll_interval_secs: 10,
            heartbeat_interval_secs: 30,
            retry: RetryConfig::default(),
            timeouts: StageTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: uuid::Uuid::new_v4().to_string(),
            base_url: None,
            project: None,
            max_jobs: 1,
            max_queue: None,
            registry: RegistryConfig::default(),
            build: BuildConfig::default(),
            runner: RunnerConfig::default(),
            scheduler: SchedulerConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads, overrides and validates the configuration
    ///
    /// Expected environment variables:
    /// - LAUNCHPAD_CONFIG (optional, path to the YAML file)
    /// - LAUNCHPAD_AGENT_ID, LAUNCHPAD_BASE_URL, LAUNCHPAD_PROJECT (optional)
    /// - LAUNCHPAD_MAX_JOBS (optional, integer, negative = unbounded)
    /// - LAUNCHPAD_BIND_ADDR (optional)
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("LAUNCHPAD_CONFIG").ok().map(PathBuf::from);

        let mut config = match &explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML configuration file without validating it
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Applies overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(agent_id) = lookup("LAUNCHPAD_AGENT_ID") {
            self.agent_id = agent_id;
        }
        if let Some(base_url) = lookup("LAUNCHPAD_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if let Some(project) = lookup("LAUNCHPAD_PROJECT") {
            self.project = Some(project);
        }
        if let Some(max_jobs) = lookup("LAUNCHPAD_MAX_JOBS") {
            self.max_jobs = max_jobs.trim().parse().map_err(|_| {
                ConfigError::invalid(format!("LAUNCHPAD_MAX_JOBS is not an integer: {}", max_jobs))
            })?;
        }
        if let Some(bind_addr) = lookup("LAUNCHPAD_BIND_ADDR") {
            self.api.bind_addr = bind_addr;
        }
        Ok(())
    }

    /// Slot count, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        usize::try_from(self.max_jobs).ok()
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::invalid("agent-id cannot be empty"));
        }

        if let Some(base_url) = &self.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::invalid(
                    "base-url must start with http:// or https://",
                ));
            }
            if self.project.as_deref().is_none_or(|p| p.trim().is_empty()) {
                return Err(ConfigError::invalid(
                    "project is required when base-url is set",
                ));
            }
        }

        self.validate_registry()?;
        self.validate_build()?;
        self.validate_runner()?;
        self.validate_scheduler()?;

        self.api.bind_addr.parse::<SocketAddr>().map_err(|_| {
            ConfigError::invalid(format!("api.bind-addr '{}' is not a socket address", self.api.bind_addr))
        })?;

        Ok(())
    }

    fn validate_registry(&self) -> Result<(), ConfigError> {
        let registry = &self.registry;
        if registry.provider == RegistryProvider::Local {
            return Ok(());
        }

        let url = registry.url.as_deref().unwrap_or("").trim();
        if url.is_empty() {
            return Err(ConfigError::invalid(format!(
                "registry.url is required for provider '{}'",
                registry.provider.as_str()
            )));
        }
        if url.contains("://") {
            return Err(ConfigError::invalid(
                "registry.url must be a repository reference without a scheme",
            ));
        }

        let host = url.split('/').next().unwrap_or_default();
        let region = registry.region.as_deref();

        match registry.provider {
            RegistryProvider::Ecr => {
                let Some(region) = region else {
                    return Err(ConfigError::invalid("registry.region is required for ecr"));
                };
                let expected = format!(".dkr.ecr.{}.amazonaws.com", region);
                if !host.ends_with(&expected) {
                    return Err(ConfigError::invalid(format!(
                        "ecr registry host '{}' does not match region {}",
                        host, region
                    )));
                }
            }
            RegistryProvider::Gcr => {
                let artifact_registry = host.ends_with("-docker.pkg.dev");
                let container_registry = host == "gcr.io" || host.ends_with(".gcr.io");
                if !artifact_registry && !container_registry {
                    return Err(ConfigError::invalid(format!(
                        "gcr registry host '{}' is not a gcr.io or pkg.dev host",
                        host
                    )));
                }
                if let (true, Some(region)) = (artifact_registry, region) {
                    if !host.starts_with(&format!("{}-", region)) {
                        return Err(ConfigError::invalid(format!(
                            "gcr registry host '{}' does not match region {}",
                            host, region
                        )));
                    }
                }
            }
            RegistryProvider::Acr => {
                if !host.ends_with(".azurecr.io") {
                    return Err(ConfigError::invalid(format!(
                        "acr registry host '{}' is not an azurecr.io host",
                        host
                    )));
                }
            }
            RegistryProvider::Generic | RegistryProvider::Local => {}
        }

        Ok(())
    }

    fn validate_build(&self) -> Result<(), ConfigError> {
        if self.build.build_type == BuildType::Kaniko {
            if self.registry.provider == RegistryProvider::Local {
                return Err(ConfigError::invalid(
                    "kaniko builds push directly and need a remote registry",
                ));
            }
            if self.build.image.trim().is_empty() {
                return Err(ConfigError::invalid("build.image cannot be empty"));
            }
        }
        if self.build.build_type == BuildType::Podman && self.build.local_repository.trim().is_empty()
        {
            return Err(ConfigError::invalid("build.local-repository cannot be empty"));
        }
        Ok(())
    }

    fn validate_runner(&self) -> Result<(), ConfigError> {
        match self.runner.runner_type {
            RunnerType::Sagemaker | RunnerType::Vertex => Err(ConfigError::Unsupported {
                kind: "runner type",
                value: self.runner.runner_type.as_str().to_string(),
            }),
            RunnerType::Kubernetes if self.registry.provider == RegistryProvider::Local => {
                Err(ConfigError::invalid(
                    "kubernetes runner cannot pull from the local image store; configure a registry",
                ))
            }
            _ => Ok(()),
        }
    }

    fn validate_scheduler(&self) -> Result<(), ConfigError> {
        if self.max_jobs == 0 {
            return Err(ConfigError::invalid(
                "max-jobs must be positive, or negative for no limit",
            ));
        }

        let scheduler = &self.scheduler;
        if scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll-interval-secs must be greater than 0"));
        }
        if scheduler.queue_poll_interval_secs == 0 || scheduler.heartbeat_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "queue-poll-interval-secs and heartbeat-interval-secs must be greater than 0",
            ));
        }
        if scheduler.history_limit == 0 {
            return Err(ConfigError::invalid("history-limit must be greater than 0"));
        }

        let t = &scheduler.timeouts;
        if [t.build_secs, t.push_secs, t.launch_secs, t.poll_secs].contains(&0)
            || t.run_secs == Some(0)
        {
            return Err(ConfigError::invalid("stage timeouts must be greater than 0"));
        }

        scheduler.retry.validate().map_err(ConfigError::Invalid)
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const FULL: &str = r#"
agent-id: agent-7
base-url: https://api.example.com
project: vision
max-jobs: 4
registry:
  url: 123456789012.dkr.ecr.us-east-1.amazonaws.com/launch
  provider: ecr
  region: us-east-1
build:
  type: kaniko
  cloud-provider: aws
  build-context-store: s3://launch-contexts
runner:
  type: kubernetes
  namespace: launch-jobs
  role: launch-runner
scheduler:
  slot-release: on-running
  retry:
    build:
      max-attempts: 5
"#;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.max_jobs, 1);
        assert_eq!(config.capacity(), Some(1));
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_yaml() {
        let config = AgentConfig::from_yaml(FULL).unwrap();

        assert_eq!(config.agent_id, "agent-7");
        assert_eq!(config.capacity(), Some(4));
        assert_eq!(config.registry.provider, RegistryProvider::Ecr);
        assert_eq!(config.build.build_type, BuildType::Kaniko);
        assert_eq!(
            config.build.build_context_store.as_deref(),
            Some("s3://launch-contexts")
        );
        assert_eq!(config.runner.runner_type, RunnerType::Kubernetes);
        assert_eq!(config.scheduler.slot_release, SlotRelease::OnRunning);
        assert_eq!(config.scheduler.retry.build.max_attempts, 5);
        // untouched stages keep their defaults
        assert_eq!(config.scheduler.retry.push.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_max_jobs_is_unbounded() {
        let config = AgentConfig::from_yaml("max-jobs: -1").unwrap();
        assert_eq!(config.capacity(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_jobs_is_rejected() {
        let config = AgentConfig::from_yaml("max-jobs: 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max-jobs must be positive"));
    }

    #[test]
    fn test_unknown_builder_type_is_rejected() {
        assert!(matches!(
            AgentConfig::from_yaml("build:\n  type: buildah"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LAUNCHPAD_MAX_JOBS", "-1"),
            ("LAUNCHPAD_BIND_ADDR", "0.0.0.0:9090"),
            ("LAUNCHPAD_AGENT_ID", "override"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.capacity(), None);
        assert_eq!(config.api.bind_addr, "0.0.0.0:9090");
        assert_eq!(config.agent_id, "override");
    }

    #[test]
    fn test_bad_max_jobs_override() {
        let mut config = AgentConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "LAUNCHPAD_MAX_JOBS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();

        config.agent_id = String::new();
        assert!(config.validate().is_err());
        config.agent_id = "agent".to_string();

        config.base_url = Some("not-a-url".to_string());
        assert!(config.validate().is_err());

        config.base_url = Some("http://localhost:8080".to_string());
        assert!(config.validate().is_err(), "project is required");

        config.project = Some("vision".to_string());
        assert!(config.validate().is_ok());

        config.api.bind_addr = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registry_provider_schemes() {
        let mut config = AgentConfig::default();
        config.registry.provider = RegistryProvider::Ecr;
        config.registry.url = Some("123.dkr.ecr.eu-west-1.amazonaws.com/launch".to_string());
        config.registry.region = Some("us-east-1".to_string());
        assert!(config.validate().is_err(), "region mismatch");

        config.registry.region = Some("eu-west-1".to_string());
        assert!(config.validate().is_ok());

        config.registry.provider = RegistryProvider::Gcr;
        config.registry.url = Some("us-central1-docker.pkg.dev/proj/repo".to_string());
        config.registry.region = Some("us-central1".to_string());
        assert!(config.validate().is_ok());

        config.registry.provider = RegistryProvider::Acr;
        assert!(config.validate().is_err());
        config.registry.url = Some("team.azurecr.io/launch".to_string());
        assert!(config.validate().is_ok());

        config.registry.provider = RegistryProvider::Generic;
        config.registry.url = Some("https://registry.example.com/launch".to_string());
        assert!(config.validate().is_err(), "scheme is not allowed");
        config.registry.url = None;
        assert!(config.validate().is_err(), "url is required");
    }

    #[test]
    fn test_incompatible_adapter_combinations() {
        let mut config = AgentConfig::default();
        config.build.build_type = BuildType::Kaniko;
        assert!(config.validate().is_err(), "kaniko needs a remote registry");

        let mut config = AgentConfig::default();
        config.runner.runner_type = RunnerType::Kubernetes;
        assert!(config.validate().is_err(), "cluster cannot pull local images");

        let mut config = AgentConfig::default();
        config.runner.runner_type = RunnerType::Sagemaker;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = AgentConfig::default();
        config.scheduler.timeouts.push_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.scheduler.timeouts.run_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = AgentConfig::from_file(Path::new("/nonexistent/launch-config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
