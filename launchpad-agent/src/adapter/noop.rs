//! Pass-through adapters for prebuilt images and the local image store

use async_trait::async_trait;
use launchpad_core::domain::launch::{LaunchSpec, SourceRef};
use launchpad_core::domain::run::{ImageRef, PublishedRef};
use tracing::debug;
use uuid::Uuid;

use super::{Builder, Publisher, RegistryTarget};
use crate::error::AdapterError;

/// Builder that only accepts prebuilt images
pub struct NoopBuilder;

#[async_trait]
impl Builder for NoopBuilder {
    fn kind(&self) -> &'static str {
        "noop"
    }

    async fn build(&self, job_id: Uuid, spec: &LaunchSpec) -> Result<ImageRef, AdapterError> {
        match &spec.source {
            SourceRef::Image { uri } => {
                debug!("Job {} uses prebuilt image {}", job_id, uri);
                Ok(ImageRef::remote(uri.clone()))
            }
            SourceRef::Context { uri, .. } => Err(AdapterError::terminal(format!(
                "noop builder cannot build context {}",
                uri
            ))),
        }
    }
}

/// Publisher for images that never leave the agent host
pub struct LocalPublisher;

#[async_trait]
impl Publisher for LocalPublisher {
    fn provider(&self) -> &'static str {
        "local"
    }

    async fn push(
        &self,
        _job_id: Uuid,
        image: &ImageRef,
        _target: &RegistryTarget,
    ) -> Result<PublishedRef, AdapterError> {
        Ok(PublishedRef {
            reference: image.reference.clone(),
            provider: self.provider().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_builder_passes_images_through() {
        let spec = LaunchSpec::from_image("docker.io/library/python:3.12");
        let image = NoopBuilder.build(Uuid::new_v4(), &spec).await.unwrap();

        assert_eq!(image.reference, "docker.io/library/python:3.12");
        assert!(image.pushed);
    }

    #[tokio::test]
    async fn test_noop_builder_rejects_contexts() {
        let spec = LaunchSpec::from_context("./project");
        let err = NoopBuilder.build(Uuid::new_v4(), &spec).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_local_publisher_keeps_reference() {
        let image = ImageRef::local("localhost/launchpad/train:abc");
        let published = LocalPublisher
            .push(Uuid::new_v4(), &image, &RegistryTarget::local())
            .await
            .unwrap();

        assert_eq!(published.reference, "localhost/launchpad/train:abc");
        assert_eq!(published.provider, "local");
    }
}
