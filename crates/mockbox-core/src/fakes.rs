//! In-memory importer for tests.
//!
//! `RecordingImporter` accepts every call, remembers it in order, and can be
//! told to reject specific artifacts.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use crate::error::ImportError;
use crate::importer::{ArtifactImporter, ImportResult};

/// Which import operation was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    LocalPrimary,
    LocalSecondary,
    RemotePrimary,
    RemoteSecondary,
}

/// One recorded import call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCall {
    pub kind: ImportKind,
    pub endpoint: String,
    /// File path or URL as passed in
    pub artifact: String,
}

#[derive(Debug, Default)]
pub struct RecordingImporter {
    calls: Mutex<Vec<ImportCall>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any artifact whose path or URL ends with `suffix`.
    pub fn reject(&self, suffix: &str) {
        self.rejected.lock().unwrap().insert(suffix.to_string());
    }

    pub fn calls(&self) -> Vec<ImportCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Artifacts passed to calls of `kind`, in call order.
    pub fn artifacts_of(&self, kind: ImportKind) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.artifact.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, kind: ImportKind, endpoint: &str, artifact: String) -> ImportResult {
        self.calls.lock().unwrap().push(ImportCall {
            kind,
            endpoint: endpoint.to_string(),
            artifact: artifact.clone(),
        });
        let rejected = self
            .rejected
            .lock()
            .unwrap()
            .iter()
            .any(|suffix| artifact.ends_with(suffix.as_str()));
        if rejected {
            return Err(ImportError::Rejected {
                artifact,
                status: 400,
                body: "rejected by RecordingImporter".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactImporter for RecordingImporter {
    async fn import_primary(&self, endpoint: &str, path: &Path) -> ImportResult {
        self.record(ImportKind::LocalPrimary, endpoint, path.display().to_string())
    }

    async fn import_secondary(&self, endpoint: &str, path: &Path) -> ImportResult {
        self.record(ImportKind::LocalSecondary, endpoint, path.display().to_string())
    }

    async fn download_remote_primary(&self, endpoint: &str, url: &str) -> ImportResult {
        self.record(ImportKind::RemotePrimary, endpoint, url.to_string())
    }

    async fn download_remote_secondary(&self, endpoint: &str, url: &str) -> ImportResult {
        self.record(ImportKind::RemoteSecondary, endpoint, url.to_string())
    }
}
