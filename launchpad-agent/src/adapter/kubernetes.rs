//! Kubernetes-backed adapters
//!
//! `KubernetesRunner` launches each workload as a batch Job; `KanikoBuilder`
//! builds images in-cluster with a Kaniko executor Job that pushes straight to
//! the registry. Both only create, get and delete batch Jobs in their target
//! namespace.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use kube::Client;
use kube::api::{Api, DeleteParams, PostParams};
use launchpad_core::domain::launch::{LaunchSpec, SourceRef};
use launchpad_core::domain::run::{ImageRef, PublishedRef, RunHandle, RunStatus};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Builder, RegistryTarget, Runner, image_name, image_tag, workload_name};
use crate::config::{BuildConfig, RunnerConfig};
use crate::error::AdapterError;

const BACKEND: &str = "kubernetes";
const JOB_LABEL: &str = "launchpad.dev/job-id";
const BUILD_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Sorts Kubernetes API errors into retryable and permanent failures
fn classify_kube_error(context: &str, err: kube::Error) -> AdapterError {
    match err {
        kube::Error::Api(response) => {
            let message = format!("{}: {} ({})", context, response.message, response.code);
            match response.code {
                400 | 401 | 403 | 404 | 422 => AdapterError::Terminal(message),
                _ => AdapterError::Transient(message),
            }
        }
        other => AdapterError::transient(format!("{}: {}", context, other)),
    }
}

fn jobs_api(client: &Client, namespace: Option<&str>) -> Api<Job> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::default_namespaced(client.clone()),
    }
}

/// Outcome of a batch Job
#[derive(Debug, Clone, PartialEq, Eq)]
enum JobState {
    Active,
    Complete,
    Failed(String),
}

fn determine_job_state(status: Option<&JobStatus>) -> JobState {
    let Some(status) = status else {
        return JobState::Active;
    };

    if let Some(conditions) = &status.conditions {
        for condition in conditions {
            if condition.type_ == "Complete" && condition.status == "True" {
                return JobState::Complete;
            }
            if condition.type_ == "Failed" && condition.status == "True" {
                let reason = condition
                    .message
                    .clone()
                    .or_else(|| condition.reason.clone())
                    .unwrap_or_else(|| "job failed".to_string());
                return JobState::Failed(reason);
            }
        }
    }

    if status.succeeded.unwrap_or(0) > 0 {
        return JobState::Complete;
    }
    if status.failed.unwrap_or(0) > 0 {
        return JobState::Failed("pod failed".to_string());
    }

    JobState::Active
}

/// Creates `job`, treating an existing Job with the same name as success
async fn create_idempotent(jobs: &Api<Job>, job: &Job, name: &str) -> Result<(), AdapterError> {
    match jobs.create(&PostParams::default(), job).await {
        Ok(_) => {
            info!("Created job {}", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            info!("Job {} already exists, adopting it", name);
            Ok(())
        }
        Err(e) => Err(classify_kube_error("failed to create job", e)),
    }
}

async fn delete_job(jobs: &Api<Job>, name: &str) -> Result<(), AdapterError> {
    match jobs.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(classify_kube_error("failed to delete job", e)),
    }
}

fn labels_for(job_id: Uuid, spec: &LaunchSpec, component: &str) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), sanitize_label_value(v)))
        .collect();
    labels.insert(JOB_LABEL.to_string(), job_id.to_string());
    labels.insert("app.kubernetes.io/managed-by".to_string(), "launchpad".to_string());
    labels.insert("app.kubernetes.io/component".to_string(), component.to_string());
    labels
}

/// Label values: at most 63 characters of `[A-Za-z0-9-_.]`, alphanumeric at both ends
fn sanitize_label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(63)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

// ===== Runner =====

/// Runs workloads as batch Jobs
pub struct KubernetesRunner {
    client: Client,
    namespace: Option<String>,
    service_account: Option<String>,
    output_location: Option<String>,
}

impl KubernetesRunner {
    pub fn new(client: Client, config: &RunnerConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            service_account: config.role.clone(),
            output_location: config.output_location.clone(),
        }
    }

    fn build_job_spec(
        &self,
        job_id: Uuid,
        name: &str,
        image: &str,
        spec: &LaunchSpec,
    ) -> Result<Job, AdapterError> {
        let mut env: Vec<serde_json::Value> = spec
            .env
            .iter()
            .map(|(k, v)| json!({ "name": k, "value": v }))
            .collect();

        let output_location = spec
            .runner_params
            .output_location
            .as_ref()
            .or(self.output_location.as_ref());
        if let Some(location) = output_location {
            env.push(json!({ "name": "LAUNCHPAD_OUTPUT_LOCATION", "value": location }));
        }

        let mut container = json!({
            "name": "main",
            "image": image,
            "env": env,
        });
        if !spec.entrypoint.is_empty() {
            container["command"] = json!(spec.entrypoint);
        }
        if !spec.args.is_empty() {
            container["args"] = json!(spec.args);
        }

        let mut pod_spec = json!({
            "restartPolicy": "Never",
            "containers": [container],
        });
        let service_account = spec.runner_params.role.as_ref().or(self.service_account.as_ref());
        if let Some(account) = service_account {
            pod_spec["serviceAccountName"] = json!(account);
        }

        let labels = labels_for(job_id, spec, "workload");
        let job = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "labels": labels,
            },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "metadata": { "labels": labels },
                    "spec": pod_spec,
                }
            }
        });

        serde_json::from_value(job)
            .map_err(|e| AdapterError::terminal(format!("invalid job spec: {}", e)))
    }
}

#[async_trait]
impl Runner for KubernetesRunner {
    fn kind(&self) -> &'static str {
        BACKEND
    }

    async fn launch(
        &self,
        job_id: Uuid,
        image: &PublishedRef,
        spec: &LaunchSpec,
    ) -> Result<RunHandle, AdapterError> {
        let name = workload_name(job_id);
        let namespace = spec
            .runner_params
            .namespace
            .clone()
            .or_else(|| self.namespace.clone());

        let job = self.build_job_spec(job_id, &name, &image.reference, spec)?;
        let jobs = jobs_api(&self.client, namespace.as_deref());
        create_idempotent(&jobs, &job, &name).await?;

        Ok(RunHandle {
            backend: BACKEND.to_string(),
            id: name,
            namespace,
        })
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RunStatus, AdapterError> {
        let jobs = jobs_api(&self.client, handle.namespace.as_deref());

        let job = match jobs.get(&handle.id).await {
            Ok(job) => job,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok(RunStatus::Failed(format!("job {} no longer exists", handle.id)));
            }
            Err(e) => return Err(classify_kube_error("failed to get job", e)),
        };

        Ok(match determine_job_state(job.status.as_ref()) {
            JobState::Active => RunStatus::Running,
            JobState::Complete => RunStatus::Succeeded,
            JobState::Failed(reason) => RunStatus::Failed(reason),
        })
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), AdapterError> {
        info!("Deleting job {}", handle);
        let jobs = jobs_api(&self.client, handle.namespace.as_deref());
        delete_job(&jobs, &handle.id).await
    }
}

// ===== Kaniko builder =====

/// Builds images with a Kaniko executor Job that pushes to the registry
pub struct KanikoBuilder {
    client: Client,
    namespace: Option<String>,
    executor_image: String,
    context_store: Option<String>,
    target: RegistryTarget,
}

impl KanikoBuilder {
    pub fn new(client: Client, config: &BuildConfig, target: RegistryTarget) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            executor_image: config.image.clone(),
            context_store: config.build_context_store.clone(),
            target,
        }
    }

    /// Resolves a context URI against the build context store
    fn context_url(&self, uri: &str) -> Result<String, AdapterError> {
        if uri.contains("://") {
            return Ok(uri.to_string());
        }
        let store = self.context_store.as_deref().ok_or_else(|| {
            AdapterError::terminal(format!(
                "relative context '{}' needs a build-context-store",
                uri
            ))
        })?;
        Ok(format!(
            "{}/{}",
            store.trim_end_matches('/'),
            uri.trim_start_matches("./").trim_start_matches('/')
        ))
    }

    fn build_job_spec(
        &self,
        job_id: Uuid,
        name: &str,
        spec: &LaunchSpec,
        destination: &str,
    ) -> Result<Job, AdapterError> {
        let SourceRef::Context { uri, dockerfile } = &spec.source else {
            return Err(AdapterError::terminal("not a build context"));
        };

        let args = vec![
            format!("--context={}", self.context_url(uri)?),
            format!(
                "--dockerfile={}",
                dockerfile.as_deref().unwrap_or("Dockerfile")
            ),
            format!("--destination={}", destination),
            "--cache=true".to_string(),
        ];

        let labels = labels_for(job_id, spec, "build");
        let job = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "labels": labels,
            },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "kaniko",
                            "image": self.executor_image,
                            "args": args,
                        }]
                    }
                }
            }
        });

        serde_json::from_value(job)
            .map_err(|e| AdapterError::terminal(format!("invalid build job spec: {}", e)))
    }
}

/// Deletes an unfinished build job when the build future is dropped
struct BuildJobGuard {
    jobs: Api<Job>,
    name: String,
    armed: bool,
}

impl Drop for BuildJobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let jobs = self.jobs.clone();
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move {
            if let Err(e) = delete_job(&jobs, &name).await {
                warn!("Failed to delete abandoned build job {}: {}", name, e);
            }
        });
    }
}

#[async_trait]
impl Builder for KanikoBuilder {
    fn kind(&self) -> &'static str {
        "kaniko"
    }

    async fn build(&self, job_id: Uuid, spec: &LaunchSpec) -> Result<ImageRef, AdapterError> {
        if let SourceRef::Image { uri } = &spec.source {
            debug!("Job {} uses prebuilt image {}", job_id, uri);
            return Ok(ImageRef::remote(uri.clone()));
        }

        let destination = self
            .target
            .reference_for(&image_name(spec), &image_tag(job_id))
            .ok_or_else(|| AdapterError::terminal("registry url is not configured"))?;

        let name = format!("build-{}", image_tag(job_id));
        let job = self.build_job_spec(job_id, &name, spec, &destination)?;
        let jobs = jobs_api(&self.client, self.namespace.as_deref());

        create_idempotent(&jobs, &job, &name).await?;
        let mut guard = BuildJobGuard {
            jobs: jobs.clone(),
            name: name.clone(),
            armed: true,
        };

        info!("Building {} for job {} with kaniko", destination, job_id);

        loop {
            tokio::time::sleep(BUILD_POLL_INTERVAL).await;

            let current = jobs
                .get(&name)
                .await
                .map_err(|e| classify_kube_error("failed to get build job", e))?;

            match determine_job_state(current.status.as_ref()) {
                JobState::Active => continue,
                JobState::Complete => {
                    guard.armed = false;
                    if let Err(e) = delete_job(&jobs, &name).await {
                        warn!("Failed to delete finished build job {}: {}", name, e);
                    }
                    return Ok(ImageRef::remote(destination));
                }
                JobState::Failed(reason) => {
                    // Leave nothing behind so the retry can reuse the name
                    guard.armed = false;
                    delete_job(&jobs, &name).await?;
                    return Err(AdapterError::transient(format!(
                        "build job {} failed: {}",
                        name, reason
                    )));
                }
            }
        }
    }
}
