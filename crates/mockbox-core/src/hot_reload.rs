//! Re-import of changed artifacts during a live session.
//!
//! The reconciler owns no state of its own: the service endpoint and the
//! list of previously imported artifacts are read back from exposed
//! configuration, which may have been written by another process. Only
//! files that were imported before are re-imported.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::exposed::ExposedConfig;
use crate::importer::ArtifactImporter;
use crate::matcher::ArtifactRole;
use crate::obs;
use crate::pipeline::ImportPipeline;
use crate::scanner::{ArtifactDescriptor, ArtifactLocator};

/// What one reload batch re-imported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub primaries: Vec<String>,
    pub secondaries: Vec<String>,
    pub failed: Vec<String>,
}

impl ReloadOutcome {
    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty() && self.secondaries.is_empty()
    }
}

pub struct HotReloadReconciler {
    service_name: String,
    roots: Vec<PathBuf>,
    importer: Arc<dyn ArtifactImporter>,
}

impl HotReloadReconciler {
    pub fn new(service_name: &str, roots: Vec<PathBuf>, importer: Arc<dyn ArtifactImporter>) -> Self {
        HotReloadReconciler {
            service_name: service_name.to_string(),
            roots,
            importer,
        }
    }

    /// Re-import the recorded artifacts found in `changed` (stable ids).
    ///
    /// Errors only when `exposed` has no endpoint for the service; import
    /// failures are logged and listed in the outcome.
    pub async fn on_files_changed(
        &self,
        exposed: &ExposedConfig,
        changed: &HashSet<String>,
    ) -> Result<ReloadOutcome> {
        let endpoint = exposed.require_http_url(&self.service_name)?;
        let loaded = exposed.loaded(&self.service_name);
        debug!(
            "Hot reload on {}: {} changed, {} primaries and {} secondaries recorded",
            endpoint,
            changed.len(),
            loaded.primaries.len(),
            loaded.secondaries.len()
        );

        let pipeline = ImportPipeline::new(self.importer.as_ref(), endpoint);
        let mut outcome = ReloadOutcome::default();

        let batches = [
            (ArtifactRole::Primary, &loaded.primaries),
            (ArtifactRole::Secondary, &loaded.secondaries),
        ];
        for (role, recorded) in batches {
            for stable_id in recorded.iter().filter(|id| changed.contains(id.as_str())) {
                let Some(path) = self.resolve(stable_id) else {
                    warn!("Changed artifact {} no longer exists, skipping", stable_id);
                    outcome.failed.push(stable_id.clone());
                    continue;
                };
                let mut artifact = ArtifactDescriptor::declared(stable_id, role);
                artifact.locator = ArtifactLocator::Path(path);

                if pipeline.import_one(&artifact).await {
                    match role {
                        ArtifactRole::Primary => outcome.primaries.push(stable_id.clone()),
                        ArtifactRole::Secondary => outcome.secondaries.push(stable_id.clone()),
                    }
                } else {
                    outcome.failed.push(stable_id.clone());
                }
            }
        }

        obs::emit_hot_reload(changed.len(), outcome.primaries.len(), outcome.secondaries.len());
        Ok(outcome)
    }

    /// First root containing `stable_id`, else the id itself as a path
    /// (explicitly configured artifacts).
    fn resolve(&self, stable_id: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(stable_id))
            .chain(std::iter::once(PathBuf::from(stable_id)))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposed::LoadedArtifactsRecord;
    use crate::fakes::{ImportKind, RecordingImporter};
    use tempfile::tempdir;

    fn exposed_with(primaries: &[&str], secondaries: &[&str]) -> ExposedConfig {
        let mut exposed = ExposedConfig::for_endpoints("default", "localhost", 32768, 32769);
        exposed.record_loaded(
            "default",
            &LoadedArtifactsRecord {
                primaries: primaries.iter().map(|s| s.to_string()).collect(),
                secondaries: secondaries.iter().map(|s| s.to_string()).collect(),
            },
        );
        exposed
    }

    fn changed(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_an_error() {
        let importer = Arc::new(RecordingImporter::new());
        let reconciler = HotReloadReconciler::new("default", vec![], importer);
        let result = reconciler
            .on_files_changed(&ExposedConfig::new(), &changed(&["a-openapi.yaml"]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_role_is_preserved_on_reimport() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a-openapi.yaml"), "openapi: 3.0.0").unwrap();
        std::fs::write(dir.path().join("a-metadata.yaml"), "kind: APIMetadata").unwrap();

        let importer = Arc::new(RecordingImporter::new());
        let reconciler =
            HotReloadReconciler::new("default", vec![dir.path().to_path_buf()], importer.clone());
        let exposed = exposed_with(&["a-openapi.yaml"], &["a-metadata.yaml"]);

        let outcome = reconciler
            .on_files_changed(&exposed, &changed(&["a-metadata.yaml", "a-openapi.yaml"]))
            .await
            .unwrap();

        assert_eq!(outcome.primaries, vec!["a-openapi.yaml".to_string()]);
        assert_eq!(outcome.secondaries, vec!["a-metadata.yaml".to_string()]);
        let calls = importer.calls();
        assert_eq!(calls[0].kind, ImportKind::LocalPrimary);
        assert_eq!(calls[1].kind, ImportKind::LocalSecondary);
        assert_eq!(calls[0].endpoint, "http://localhost:32768");
    }

    #[tokio::test]
    async fn test_vanished_file_is_reported_not_imported() {
        let dir = tempdir().unwrap();
        let importer = Arc::new(RecordingImporter::new());
        let reconciler =
            HotReloadReconciler::new("default", vec![dir.path().to_path_buf()], importer.clone());

        let outcome = reconciler
            .on_files_changed(&exposed_with(&["gone-openapi.yaml"], &[]), &changed(&["gone-openapi.yaml"]))
            .await
            .unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.failed, vec!["gone-openapi.yaml".to_string()]);
        assert!(importer.calls().is_empty());
    }
}
