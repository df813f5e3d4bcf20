//! mockbox configuration.
//!
//! Read from a TOML file (`mockbox.toml` by default) where every field has a
//! default, then overridden from `MOCKBOX_*` environment variables. The
//! `devservices` section is what the orchestrator compares between cycles to
//! decide whether a restart is needed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{MockboxError, Result};

/// Default main service image
pub const DEFAULT_IMAGE: &str = "quay.io/microcks/microcks-uber:latest";
/// Default async companion image
pub const DEFAULT_ASYNC_IMAGE: &str = "quay.io/microcks/microcks-uber-async-minion:latest";
/// Default collection runner image
pub const DEFAULT_COLLECTION_IMAGE: &str = "quay.io/microcks/microcks-postman-runtime:latest";
/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "mockbox.toml";

/// How the host application is being run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Interactive dev session: instances are labeled and may be shared
    #[default]
    Development,
    /// Test run: instances are private and never discovered
    Test,
}

/// Artifacts declared explicitly instead of discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default)]
    pub primaries: Vec<String>,
    #[serde(default)]
    pub secondaries: Vec<String>,
}

/// Optional companion features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {
    /// Start the async companion even without a broker
    pub async_enabled: bool,
    pub async_image_name: Option<String>,
    /// Start the collection runner even without a collection artifact
    pub postman_enabled: bool,
    pub postman_image_name: Option<String>,
}

/// The mock service and its ensemble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevServicesConfig {
    pub enabled: bool,
    pub image_name: Option<String>,
    /// Look for (and label for) a running instance to share across sessions
    pub shared: bool,
    /// Label value used for sharing; also the exposed-config namespace
    pub service_name: String,
    pub container_env: BTreeMap<String, String>,
    pub startup_timeout_secs: Option<u64>,
    /// Let containers call back into the host
    pub access_to_host: bool,
    pub artifacts: Option<ArtifactsConfig>,
    pub remote_artifacts: Option<ArtifactsConfig>,
    pub ensemble: Option<EnsembleSettings>,
}

impl Default for DevServicesConfig {
    fn default() -> Self {
        DevServicesConfig {
            enabled: true,
            image_name: None,
            shared: true,
            service_name: "default".to_string(),
            container_env: BTreeMap::new(),
            startup_timeout_secs: None,
            access_to_host: true,
            artifacts: None,
            remote_artifacts: None,
            ensemble: None,
        }
    }
}

impl DevServicesConfig {
    pub fn image(&self) -> &str {
        self.image_name.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_secs.map(Duration::from_secs)
    }

    /// Ensemble settings, all features off when the section is absent
    pub fn ensemble_settings(&self) -> EnsembleSettings {
        self.ensemble.clone().unwrap_or_default()
    }

    /// Local artifact paths named in the configuration, primaries first.
    pub fn declared_paths(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .flat_map(|a| a.primaries.iter().chain(&a.secondaries))
            .cloned()
            .collect()
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockboxConfig {
    pub devservices: DevServicesConfig,
    /// Resource directories scanned for artifacts
    pub scan_roots: Vec<PathBuf>,
    /// Where exposed configuration is persisted between invocations
    pub state_file: PathBuf,
}

impl Default for MockboxConfig {
    fn default() -> Self {
        MockboxConfig {
            devservices: DevServicesConfig::default(),
            scan_roots: vec![
                PathBuf::from("src/main/resources"),
                PathBuf::from("src/test/resources"),
            ],
            state_file: PathBuf::from(".mockbox/state.json"),
        }
    }
}

impl MockboxConfig {
    /// Load from `path` (defaults when the file is absent), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            debug!("Loading configuration from {:?}", path);
            let text = std::fs::read_to_string(path)?;
            Self::from_toml_str(&text)?
        } else {
            debug!("No configuration at {:?}, using defaults", path);
            Self::default()
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `MOCKBOX_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("MOCKBOX_SERVICE_NAME") {
            self.devservices.service_name = name;
        }
        if let Some(image) = lookup("MOCKBOX_IMAGE") {
            self.devservices.image_name = Some(image);
        }
        if let Some(shared) = lookup("MOCKBOX_SHARED") {
            self.devservices.shared = parse_bool("MOCKBOX_SHARED", &shared)?;
        }
        if let Some(enabled) = lookup("MOCKBOX_DEVSERVICES_ENABLED") {
            self.devservices.enabled = parse_bool("MOCKBOX_DEVSERVICES_ENABLED", &enabled)?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.devservices.service_name.trim().is_empty() {
            return Err(MockboxError::Config(
                "devservices.service_name must not be empty".to_string(),
            ));
        }
        if let Some(artifacts) = &self.devservices.artifacts {
            if artifacts.primaries.is_empty() && !artifacts.secondaries.is_empty() {
                tracing::warn!(
                    "Secondary artifacts are configured without primaries; they will not be imported"
                );
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MockboxError::Config(format!(
            "{key} must be a boolean, got {other:?}"
        ))),
    }
}
