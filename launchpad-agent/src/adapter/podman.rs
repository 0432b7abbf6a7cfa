//! Podman-backed adapters
//!
//! Builds, pushes and runs images with the `podman` CLI on the agent host:
//! - `PodmanBuilder`: `podman build` from a local or git context
//! - `PodmanPublisher`: `podman tag` + `podman push` to the configured registry
//! - `PodmanRunner`: detached `podman run`, polled with `podman inspect`
//!
//! Every child process is killed when its future is dropped, so a cancelled
//! or timed-out stage never leaves a stray podman invocation behind.

use async_trait::async_trait;
use launchpad_core::domain::launch::{LaunchSpec, SourceRef};
use launchpad_core::domain::run::{ImageRef, PublishedRef, RunHandle, RunStatus};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Builder, Publisher, RegistryTarget, Runner, image_name, image_tag, workload_name};
use crate::config::RegistryProvider;
use crate::error::AdapterError;

const BACKEND: &str = "local-container";
const JOB_LABEL: &str = "launchpad.job-id";

/// Output of a successful podman invocation
struct PodmanOutput {
    stdout: String,
}

/// Runs podman with `args`, classifying failures
async fn podman(args: &[String]) -> Result<PodmanOutput, AdapterError> {
    debug!("podman {}", args.join(" "));

    let output = Command::new("podman")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AdapterError::terminal("podman is not installed on the agent host")
            }
            _ => AdapterError::transient(format!("failed to execute podman: {}", e)),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stderr.trim().is_empty() {
        debug!("podman stderr: {}", stderr.trim());
    }

    if !output.status.success() {
        let exit_code = output.status.code().unwrap_or(-1);
        let subcommand = args.first().map(String::as_str).unwrap_or("");
        return Err(classify_failure(subcommand, exit_code, stderr.trim()));
    }

    Ok(PodmanOutput { stdout })
}

/// Sorts a failed podman invocation into retryable and permanent failures
fn classify_failure(subcommand: &str, exit_code: i32, stderr: &str) -> AdapterError {
    const PERMANENT: &[&str] = &[
        "unauthorized",
        "denied",
        "authentication required",
        "invalid reference format",
        "error building at step",
        "no such file or directory",
        "manifest unknown",
    ];

    let message = format!("podman {} failed (exit {}): {}", subcommand, exit_code, stderr);
    let lowered = stderr.to_ascii_lowercase();

    if PERMANENT.iter().any(|marker| lowered.contains(marker)) {
        AdapterError::Terminal(message)
    } else {
        AdapterError::Transient(message)
    }
}

fn is_missing_container(err: &AdapterError) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("no such container") || message.contains("no such object")
}

// ===== Builder =====

/// Builds images with `podman build`
pub struct PodmanBuilder {
    /// Local repository prefix (e.g. "localhost/launchpad")
    repository: String,
}

impl PodmanBuilder {
    pub fn new(repository: String) -> Self {
        Self { repository }
    }

    fn build_args(&self, job_id: Uuid, spec: &LaunchSpec, tag: &str) -> Result<Vec<String>, AdapterError> {
        let SourceRef::Context { uri, dockerfile } = &spec.source else {
            return Err(AdapterError::terminal("not a build context"));
        };

        if ["s3://", "gs://", "az://"].iter().any(|scheme| uri.starts_with(scheme)) {
            return Err(AdapterError::terminal(format!(
                "podman builder cannot read object store context {}",
                uri
            )));
        }

        let mut args = vec![
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            "--label".to_string(),
            format!("{}={}", JOB_LABEL, job_id),
        ];
        if let Some(dockerfile) = dockerfile {
            args.push("-f".to_string());
            args.push(dockerfile.clone());
        }
        args.push(uri.clone());
        Ok(args)
    }
}

#[async_trait]
impl Builder for PodmanBuilder {
    fn kind(&self) -> &'static str {
        "podman"
    }

    async fn build(&self, job_id: Uuid, spec: &LaunchSpec) -> Result<ImageRef, AdapterError> {
        if let SourceRef::Image { uri } = &spec.source {
            debug!("Job {} uses prebuilt image {}", job_id, uri);
            return Ok(ImageRef::remote(uri.clone()));
        }

        let tag = format!(
            "{}/{}:{}",
            self.repository.trim_end_matches('/'),
            image_name(spec),
            image_tag(job_id)
        );
        let args = self.build_args(job_id, spec, &tag)?;

        info!("Building image {} for job {}", tag, job_id);
        podman(&args).await?;

        Ok(ImageRef::local(tag))
    }
}

// ===== Publisher =====

/// Pushes locally built images with `podman push`
pub struct PodmanPublisher {
    provider: RegistryProvider,
}

impl PodmanPublisher {
    pub fn new(provider: RegistryProvider) -> Self {
        Self { provider }
    }
}

/// Name component of a local image reference ("localhost/launchpad/train:abc" -> "train")
fn repository_name(reference: &str) -> &str {
    let last = reference.rsplit('/').next().unwrap_or(reference);
    last.split(':').next().unwrap_or(last)
}

#[async_trait]
impl Publisher for PodmanPublisher {
    fn provider(&self) -> &'static str {
        self.provider.as_str()
    }

    async fn push(
        &self,
        job_id: Uuid,
        image: &ImageRef,
        target: &RegistryTarget,
    ) -> Result<PublishedRef, AdapterError> {
        if image.pushed {
            return Ok(PublishedRef {
                reference: image.reference.clone(),
                provider: self.provider().to_string(),
            });
        }

        let remote = target
            .reference_for(repository_name(&image.reference), &image_tag(job_id))
            .ok_or_else(|| AdapterError::terminal("registry url is not configured"))?;

        // The remote tag only becomes visible once the push completes
        podman(&["tag".to_string(), image.reference.clone(), remote.clone()]).await?;

        info!("Pushing {} for job {}", remote, job_id);
        podman(&["push".to_string(), remote.clone()]).await?;

        Ok(PublishedRef {
            reference: remote,
            provider: self.provider().to_string(),
        })
    }
}

// ===== Runner =====

/// Runs workloads as detached local containers
pub struct PodmanRunner {
    output_location: Option<String>,
}

impl PodmanRunner {
    pub fn new(output_location: Option<String>) -> Self {
        Self { output_location }
    }

    fn run_args(&self, job_id: Uuid, name: &str, image: &str, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{}={}", JOB_LABEL, job_id),
        ];

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        let output_location = spec
            .runner_params
            .output_location
            .as_ref()
            .or(self.output_location.as_ref());
        if let Some(location) = output_location {
            args.push("-e".to_string());
            args.push(format!("LAUNCHPAD_OUTPUT_LOCATION={}", location));
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        let mut command = spec.entrypoint.iter();
        if let Some(entrypoint) = command.next() {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }

        args.push(image.to_string());
        args.extend(command.cloned());
        args.extend(spec.args.iter().cloned());
        args
    }
}

/// Parses `podman inspect --format '{{.State.Status}} {{.State.ExitCode}}'`
fn parse_state(output: &str) -> Result<RunStatus, AdapterError> {
    let mut parts = output.split_whitespace();
    let status = parts.next().unwrap_or("");
    let exit_code = parts.next().and_then(|c| c.parse::<i32>().ok());

    match (status, exit_code) {
        ("created" | "running" | "paused" | "restarting" | "configured", _) => Ok(RunStatus::Running),
        ("exited" | "stopped", Some(0)) => Ok(RunStatus::Succeeded),
        ("exited" | "stopped", Some(code)) => {
            Ok(RunStatus::Failed(format!("container exited with code {}", code)))
        }
        ("dead", _) => Ok(RunStatus::Failed("container is dead".to_string())),
        _ => Err(AdapterError::transient(format!(
            "unexpected container state '{}'",
            output.trim()
        ))),
    }
}

#[async_trait]
impl Runner for PodmanRunner {
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
        let args = self.run_args(job_id, &name, &image.reference, spec);

        match podman(&args).await {
            Ok(output) => {
                info!(
                    "Started container {} ({}) for job {}",
                    name,
                    output.stdout.trim(),
                    job_id
                );
            }
            // A previous attempt already started it
            Err(e) if e.to_string().contains("already in use") => {
                warn!("Container {} already exists, adopting it", name);
            }
            Err(e) => return Err(e),
        }

        Ok(RunHandle {
            backend: BACKEND.to_string(),
            id: name,
            namespace: None,
        })
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RunStatus, AdapterError> {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}} {{.State.ExitCode}}".to_string(),
            handle.id.clone(),
        ];

        match podman(&args).await {
            Ok(output) => parse_state(&output.stdout),
            Err(e) if is_missing_container(&e) => Ok(RunStatus::Failed(format!(
                "container {} no longer exists",
                handle.id
            ))),
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), AdapterError> {
        info!("Stopping container {}", handle.id);

        let stop = ["stop".to_string(), "-t".to_string(), "10".to_string(), handle.id.clone()];
        match podman(&stop).await {
            Ok(_) => {}
            Err(e) if is_missing_container(&e) => return Ok(()),
            Err(e) => return Err(e),
        }

        if let Err(e) = podman(&["rm".to_string(), "-f".to_string(), handle.id.clone()]).await {
            warn!("Failed to remove container {}: {}", handle.id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        let err = classify_failure("push", 125, "Error: unauthorized: authentication required");
        assert!(!err.is_transient());

        let err = classify_failure("push", 125, "Error: connection reset by peer");
        assert!(err.is_transient());
        assert!(err.to_string().starts_with("podman push failed (exit 125)"));
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("running 0\n").unwrap(), RunStatus::Running);
        assert_eq!(parse_state("exited 0").unwrap(), RunStatus::Succeeded);
        assert_eq!(
            parse_state("exited 137").unwrap(),
            RunStatus::Failed("container exited with code 137".to_string())
        );
        assert!(parse_state("").unwrap_err().is_transient());
    }

    #[test]
    fn test_build_args() {
        let builder = PodmanBuilder::new("localhost/launchpad".to_string());
        let id = Uuid::new_v4();

        let mut spec = LaunchSpec::from_context("./project");
        if let SourceRef::Context { dockerfile, .. } = &mut spec.source {
            *dockerfile = Some("Dockerfile.train".to_string());
        }
        let args = builder.build_args(id, &spec, "localhost/launchpad/x:1").unwrap();
        assert_eq!(args[0], "build");
        assert!(args.windows(2).any(|w| w == ["-f", "Dockerfile.train"]));
        assert_eq!(args.last().map(String::as_str), Some("./project"));

        let spec = LaunchSpec::from_context("s3://bucket/ctx.tar.gz");
        assert!(!builder.build_args(id, &spec, "t").unwrap_err().is_transient());
    }

    #[test]
    fn test_run_args() {
        let runner = PodmanRunner::new(Some("/data/out".to_string()));
        let mut spec = LaunchSpec::from_image("python:3.12");
        spec.entrypoint = vec!["python".to_string(), "train.py".to_string()];
        spec.args = vec!["--epochs".to_string(), "3".to_string()];
        spec.env.insert("SEED".to_string(), "7".to_string());

        let args = runner.run_args(Uuid::nil(), "launch-0", "python:3.12", &spec);
        let image_at = args.iter().position(|a| a == "python:3.12").unwrap();

        assert!(args.windows(2).any(|w| w == ["--entrypoint", "python"]));
        assert!(args.windows(2).any(|w| w == ["-e", "SEED=7"]));
        assert!(args.contains(&"LAUNCHPAD_OUTPUT_LOCATION=/data/out".to_string()));
        assert_eq!(&args[image_at + 1..], ["train.py", "--epochs", "3"]);
    }

    #[test]
    fn test_repository_name() {
        assert_eq!(repository_name("localhost/launchpad/train:abc"), "train");
        assert_eq!(repository_name("train"), "train");
    }
}
