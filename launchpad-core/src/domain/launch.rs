//! Launch specification domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable description of a requested launch
///
/// Supplied by the requester (CLI, API caller or upstream queue) and never
/// mutated by the agent once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LaunchSpec {
    /// Human readable name, used for naming images and backend resources
    #[serde(default)]
    pub name: Option<String>,

    /// Where the image comes from
    pub source: SourceRef,

    /// Builder type requested by the caller (must match the agent's builder)
    #[serde(default)]
    pub builder: Option<String>,

    /// Registry provider requested by the caller (must match the agent's registry)
    #[serde(default)]
    pub registry: Option<String>,

    /// Runner type requested by the caller (must match the agent's runner)
    #[serde(default)]
    pub runner: Option<String>,

    /// Overrides the image entrypoint
    #[serde(default)]
    pub entrypoint: Vec<String>,

    /// Arguments passed to the entrypoint
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables for the launched workload
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Runner-specific parameters
    #[serde(default)]
    pub runner_params: RunnerParams,

    /// Free-form labels propagated to backend resources
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Source of the container image for a launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceRef {
    /// A prebuilt image; builders pass it through
    Image { uri: String },

    /// A build context (local path, object store URL or git URL)
    Context {
        uri: String,
        #[serde(default)]
        dockerfile: Option<String>,
    },
}

impl SourceRef {
    pub fn uri(&self) -> &str {
        match self {
            SourceRef::Image { uri } | SourceRef::Context { uri, .. } => uri,
        }
    }
}

/// Runner-specific parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerParams {
    /// Execution role / identity the workload assumes
    #[serde(default)]
    pub role: Option<String>,

    /// Where the workload writes its outputs
    #[serde(default)]
    pub output_location: Option<String>,

    /// Target namespace for cluster runners
    #[serde(default)]
    pub namespace: Option<String>,
}

impl LaunchSpec {
    /// Creates a launch spec for a prebuilt image
    pub fn from_image(uri: impl Into<String>) -> Self {
        Self::with_source(SourceRef::Image { uri: uri.into() })
    }

    /// Creates a launch spec that builds from a context
    pub fn from_context(uri: impl Into<String>) -> Self {
        Self::with_source(SourceRef::Context {
            uri: uri.into(),
            dockerfile: None,
        })
    }

    fn with_source(source: SourceRef) -> Self {
        Self {
            name: None,
            source,
            builder: None,
            registry: None,
            runner: None,
            entrypoint: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            runner_params: RunnerParams::default(),
            labels: BTreeMap::new(),
        }
    }

    /// Sets the launch name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name used in logs and resource names
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("launch")
    }

    /// Validates the fields the agent relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.source.uri().trim().is_empty() {
            return Err("source uri cannot be empty".to_string());
        }

        if let Some(key) = self.env.keys().find(|k| k.trim().is_empty()) {
            return Err(format!("invalid environment variable name '{}'", key));
        }

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("name cannot be blank".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_yaml_spec() {
        let yaml = r#"
name: train-resnet
source:
  kind: context
  uri: s3://contexts/resnet.tar.gz
  dockerfile: Dockerfile.train
runner: kubernetes
args: ["--epochs", "10"]
env:
  WANDB_PROJECT: vision
runner-params:
  namespace: launch-jobs
  output-location: s3://outputs/resnet
"#;
        let spec: LaunchSpec = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(spec.display_name(), "train-resnet");
        assert_eq!(
            spec.source,
            SourceRef::Context {
                uri: "s3://contexts/resnet.tar.gz".to_string(),
                dockerfile: Some("Dockerfile.train".to_string()),
            }
        );
        assert_eq!(spec.runner.as_deref(), Some("kubernetes"));
        assert_eq!(spec.runner_params.namespace.as_deref(), Some("launch-jobs"));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_source() {
        let spec = LaunchSpec::from_image("  ");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_env_key() {
        let mut spec = LaunchSpec::from_image("alpine:3");
        spec.env.insert(" ".to_string(), "x".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_default_display_name() {
        assert_eq!(LaunchSpec::from_image("alpine:3").display_name(), "launch");
    }
}
