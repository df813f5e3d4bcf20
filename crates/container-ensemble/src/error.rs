//! Error types for container-ensemble

use thiserror::Error;

/// Errors that can occur while driving the container runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Container runtime binary missing or daemon unreachable
    #[error("Container runtime is not available: {0}")]
    Unavailable(String),

    /// Runtime command exited with a failure status
    #[error("Container command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Runtime produced output we could not interpret
    #[error("Unexpected container runtime output: {0}")]
    InvalidOutput(String),

    /// Readiness probe could not be compiled
    #[error("Invalid readiness probe: {0}")]
    InvalidProbe(String),

    /// Container did not become ready in time
    #[error("Container {container_id} not ready after {timeout_secs}s")]
    ReadinessTimeout {
        container_id: String,
        timeout_secs: u64,
    },

    /// Container stopped before signalling readiness
    #[error("Container {container_id} exited before becoming ready")]
    ContainerExited { container_id: String },

    /// Container id unknown to the runtime
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<regex::Error> for RuntimeError {
    fn from(err: regex::Error) -> Self {
        RuntimeError::InvalidProbe(err.to_string())
    }
}

impl RuntimeError {
    /// Whether this error means "no runtime to talk to" rather than a
    /// failure of a particular container.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }
}
