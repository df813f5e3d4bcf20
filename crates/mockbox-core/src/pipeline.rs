//! Artifact import into a running mock service.
//!
//! Order matters: a secondary artifact only makes sense once the primary it
//! augments is loaded. The pipeline therefore plans remote primaries, remote
//! secondaries, local primaries and finally local secondaries, and drops the
//! last group when no local primary was planned.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::ArtifactsConfig;
use crate::exposed::LoadedArtifactsRecord;
use crate::importer::{ArtifactImporter, ImportResult};
use crate::matcher::ArtifactRole;
use crate::obs;
use crate::scanner::{ArtifactDescriptor, ArtifactLocator, ScanResult};

/// Import order for one cycle.
///
/// Explicitly configured local artifacts replace scan results entirely.
/// Declared files under one of `roots` are keyed by their root-relative path.
pub fn plan(
    remote: Option<&ArtifactsConfig>,
    local: Option<&ArtifactsConfig>,
    scan: &ScanResult,
    roots: &[PathBuf],
) -> Vec<ArtifactDescriptor> {
    let mut planned = Vec::new();

    if let Some(remote) = remote {
        planned.extend(
            remote
                .primaries
                .iter()
                .map(|url| ArtifactDescriptor::remote(url, ArtifactRole::Primary)),
        );
        planned.extend(
            remote
                .secondaries
                .iter()
                .map(|url| ArtifactDescriptor::remote(url, ArtifactRole::Secondary)),
        );
    }

    match local {
        Some(local) => {
            planned.extend(
                local
                    .primaries
                    .iter()
                    .map(|path| ArtifactDescriptor::declared_under(path, ArtifactRole::Primary, roots)),
            );
            if !local.primaries.is_empty() {
                planned.extend(
                    local
                        .secondaries
                        .iter()
                        .map(|path| {
                            ArtifactDescriptor::declared_under(path, ArtifactRole::Secondary, roots)
                        }),
                );
            }
        }
        None => {
            planned.extend(scan.primaries.values().cloned());
            if !scan.primaries.is_empty() {
                planned.extend(scan.secondaries.values().cloned());
            }
        }
    }
    planned
}

/// Runs a planned import against one service endpoint.
pub struct ImportPipeline<'a> {
    importer: &'a dyn ArtifactImporter,
    endpoint: &'a str,
    roots: &'a [PathBuf],
}

impl<'a> ImportPipeline<'a> {
    pub fn new(importer: &'a dyn ArtifactImporter, endpoint: &'a str) -> Self {
        ImportPipeline {
            importer,
            endpoint,
            roots: &[],
        }
    }

    /// Scan roots used to key declared artifacts.
    pub fn with_roots(mut self, roots: &'a [PathBuf]) -> Self {
        self.roots = roots;
        self
    }

    /// Import everything in order. Failures are logged and skipped; every
    /// attempted local artifact is recorded whatever its outcome.
    pub async fn import_all(
        &self,
        remote: Option<&ArtifactsConfig>,
        local: Option<&ArtifactsConfig>,
        scan: &ScanResult,
    ) -> LoadedArtifactsRecord {
        let mut record = LoadedArtifactsRecord::default();
        let planned = plan(remote, local, scan, self.roots);
        debug!("Importing {} artifacts into {}", planned.len(), self.endpoint);

        let mut failures = 0usize;
        for artifact in &planned {
            if !self.import_one(artifact).await {
                failures += 1;
            }
            if let ArtifactLocator::Path(_) = artifact.locator {
                match artifact.role {
                    ArtifactRole::Primary => record.primaries.push(artifact.stable_id.clone()),
                    ArtifactRole::Secondary => record.secondaries.push(artifact.stable_id.clone()),
                }
            }
        }

        info!(
            "Imported {} of {} artifacts into {}",
            planned.len() - failures,
            planned.len(),
            self.endpoint
        );
        record
    }

    /// Import a single artifact; `false` on failure.
    pub async fn import_one(&self, artifact: &ArtifactDescriptor) -> bool {
        let remote = matches!(artifact.locator, ArtifactLocator::Url(_));
        let role = artifact.role.to_string();
        info!("Load '{}' as {} artifact", artifact.locator, role);

        match self.dispatch(artifact).await {
            Ok(()) => {
                obs::emit_artifact_imported(&artifact.stable_id, &role, remote);
                true
            }
            Err(e) => {
                obs::emit_artifact_import_failed(&artifact.stable_id, &role, &e);
                false
            }
        }
    }

    async fn dispatch(&self, artifact: &ArtifactDescriptor) -> ImportResult {
        match (&artifact.locator, artifact.role) {
            (ArtifactLocator::Url(url), ArtifactRole::Primary) => {
                self.importer.download_remote_primary(self.endpoint, url).await
            }
            (ArtifactLocator::Url(url), ArtifactRole::Secondary) => {
                self.importer.download_remote_secondary(self.endpoint, url).await
            }
            (ArtifactLocator::Path(path), ArtifactRole::Primary) => {
                self.importer.import_primary(self.endpoint, path).await
            }
            (ArtifactLocator::Path(path), ArtifactRole::Secondary) => {
                self.importer.import_secondary(self.endpoint, path).await
            }
        }
    }
}

/// Convenience wrapper over [`ImportPipeline::import_all`].
pub async fn import_all(
    importer: &dyn ArtifactImporter,
    endpoint: &str,
    remote: Option<&ArtifactsConfig>,
    local: Option<&ArtifactsConfig>,
    scan: &ScanResult,
) -> LoadedArtifactsRecord {
    ImportPipeline::new(importer, endpoint)
        .import_all(remote, local, scan)
        .await
}
