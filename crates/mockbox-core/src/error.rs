//! Error taxonomy for mockbox.

use container_ensemble::RuntimeError;

/// Failure of a single artifact import call.
///
/// Never aborts a batch; the pipeline logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("artifact {artifact} rejected with status {status}: {body}")]
    Rejected {
        artifact: String,
        status: u16,
        body: String,
    },

    #[error("cannot read artifact {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// mockbox errors.
#[derive(Debug, thiserror::Error)]
pub enum MockboxError {
    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("failed to start {service}: {source}")]
    Startup {
        service: String,
        #[source]
        source: RuntimeError,
    },

    #[error("illegal lifecycle transition for {service}: {from:?} on {event:?}")]
    IllegalTransition {
        service: String,
        from: crate::orchestrator::lifecycle::Phase,
        event: crate::orchestrator::lifecycle::PhaseEvent,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("exposed configuration missing key {0}")]
    MissingExposedKey(String),

    #[error("import error: {0}")]
    Import(#[from] ImportError),

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mockbox operations.
pub type Result<T> = std::result::Result<T, MockboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_names_service() {
        let err = MockboxError::Startup {
            service: "default".to_string(),
            source: RuntimeError::ContainerExited {
                container_id: "abc".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to start default"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_rejected_import_display() {
        let err = ImportError::Rejected {
            artifact: "orders-openapi.yaml".to_string(),
            status: 400,
            body: "bad spec".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders-openapi.yaml"));
        assert!(msg.contains("400"));
    }

    #[test]
    fn test_runtime_error_converts() {
        let err: MockboxError = RuntimeError::Unavailable("no docker".into()).into();
        assert!(matches!(err, MockboxError::Runtime(_)));
    }
}
