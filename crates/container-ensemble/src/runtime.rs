//! The container runtime boundary
//!
//! Everything mockbox needs from a container engine, expressed as one async
//! trait. [`crate::DockerCli`] drives a real engine; [`crate::fakes::FakeRuntime`]
//! keeps everything in memory for tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::spec::{ContainerAddress, ContainerSpec, LabelSelector, ReadinessProbe, StartedContainer};
use crate::Result;

/// Container engine operations used by the ensemble orchestrator.
///
/// Guarantees expected from implementations:
/// - `start` creates, labels, network-attaches and starts in one step; it does
///   not wait for readiness.
/// - `locate` only reports containers that are running, carry the label and
///   publish `container_port`.
/// - `stop` also removes the container.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the engine is reachable at all.
    async fn is_available(&self) -> bool;

    /// Create the named network unless it already exists.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// Launch a container from `spec`.
    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer>;

    /// Block until `probe` succeeds for the container, bounded by `timeout`
    /// (or the runtime default when `None`).
    async fn wait_ready(
        &self,
        container_id: &str,
        probe: &ReadinessProbe,
        timeout: Option<Duration>,
    ) -> Result<()>;

    /// Host port a container port was published on.
    async fn mapped_port(&self, container_id: &str, container_port: u16) -> Result<u16>;

    /// Find a running container carrying `selector` that publishes
    /// `container_port`.
    async fn locate(
        &self,
        selector: &LabelSelector,
        container_port: u16,
    ) -> Result<Option<ContainerAddress>>;

    /// Stop and remove a container.
    async fn stop(&self, container_id: &str) -> Result<()>;
}
