//! Exposed configuration persisted between invocations.
//!
//! `mockbox up` writes the ensemble's exposed configuration here once the
//! cycle completes, so `mockbox reload` and `mockbox status`, running as
//! separate processes, can find the service and the loaded artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::exposed::ExposedConfig;
use crate::orchestrator::{Ensemble, ServiceSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub written_at: DateTime<Utc>,
    pub service_name: String,
    pub exposed_config: ExposedConfig,
    pub services: Vec<ServiceSummary>,
}

impl StateFile {
    pub fn from_ensemble(service_name: &str, ensemble: &Ensemble) -> Self {
        StateFile {
            written_at: Utc::now(),
            service_name: service_name.to_string(),
            exposed_config: ensemble.exposed_config.clone(),
            services: ensemble.services.clone(),
        }
    }

    /// Write as pretty JSON, replacing any previous file.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!("State written to {}", path.display());
        Ok(())
    }

    /// `None` when no state has been written.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
