//! Container-Ensemble: container runtime layer for mockbox
//!
//! This crate is the only place mockbox talks to a container engine.
//! It describes containers to launch ([`ContainerSpec`]), waits for them to
//! become ready ([`ReadinessProbe`]), finds labeled containers started by
//! other processes, and stops the ones we own.
//!
//! ## Backends
//!
//! - [`DockerCli`] shells out to the `docker` command line.
//! - [`fakes::FakeRuntime`] keeps everything in memory for tests.

pub mod docker;
pub mod error;
pub mod fakes;
pub mod runtime;
pub mod spec;

pub use docker::{DockerCli, DockerConfig, DEFAULT_STARTUP_TIMEOUT};
pub use error::RuntimeError;
pub use runtime::ContainerRuntime;
pub use spec::{
    ContainerAddress, ContainerSpec, LabelSelector, ReadinessProbe, StartedContainer,
    HOST_GATEWAY_NAME,
};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Check whether a docker CLI is installed and its daemon answers
pub async fn is_docker_available() -> bool {
    DockerCli::from_env().is_available().await
}
