//! Container runtime access
//!
//! The collectors only need three read-only calls from the runtime, so the
//! runtime is modelled as a trait. `DockerClient` speaks the Docker Engine
//! HTTP API; tests substitute in-memory implementations.

mod docker;

pub use docker::DockerClient;

use crate::error::RuntimeError;
use crate::models::{ContainerDetail, ContainerSummary, ImageSummary};

pub use async_trait::async_trait;

/// Read-only view of a container runtime
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// List containers, including stopped ones when `all` is set
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Fetch the inspection detail of one container
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, RuntimeError>;

    /// List images, including intermediate layers when `all` is set
    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>, RuntimeError>;
}
