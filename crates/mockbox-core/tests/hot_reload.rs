//! Hot reload reads its scope from exposed configuration only.

use mockbox_core::fakes::{ImportKind, RecordingImporter};
use mockbox_core::watch::relative_ids;
use mockbox_core::{
    ArtifactsConfig, ExposedConfig, HotReloadReconciler, ImportPipeline, LoadedArtifactsRecord,
    ScanResult, StateFile,
};
use mockbox_core::orchestrator::lifecycle::Phase;
use mockbox_core::Ensemble;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

fn changed(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_only_recorded_files_are_reimported() {
    let resources = tempfile::tempdir().unwrap();
    std::fs::write(resources.path().join("a.yaml"), "a").unwrap();
    std::fs::write(resources.path().join("b.yaml"), "b").unwrap();

    let mut exposed = ExposedConfig::for_endpoints("default", "localhost", 32768, 32769);
    exposed.record_loaded(
        "default",
        &LoadedArtifactsRecord {
            primaries: vec!["a.yaml".to_string()],
            secondaries: vec![],
        },
    );

    let importer = Arc::new(RecordingImporter::new());
    let reconciler = HotReloadReconciler::new(
        "default",
        vec![resources.path().to_path_buf()],
        importer.clone(),
    );
    let outcome = reconciler
        .on_files_changed(&exposed, &changed(&["a.yaml", "b.yaml"]))
        .await
        .unwrap();

    assert_eq!(outcome.primaries, vec!["a.yaml".to_string()]);
    assert!(outcome.secondaries.is_empty());
    let imported = importer.artifacts_of(ImportKind::LocalPrimary);
    assert_eq!(imported.len(), 1);
    assert!(imported[0].ends_with("a.yaml"));
}

#[tokio::test]
async fn test_unrecorded_changes_are_ignored() {
    let importer = Arc::new(RecordingImporter::new());
    let reconciler = HotReloadReconciler::new("default", vec![], importer.clone());
    let exposed = ExposedConfig::for_endpoints("default", "localhost", 32768, 32769);

    let outcome = reconciler
        .on_files_changed(&exposed, &changed(&["new-openapi.yaml"]))
        .await
        .unwrap();

    assert!(outcome.is_empty());
    assert!(outcome.failed.is_empty());
    assert!(importer.calls().is_empty());
}

#[tokio::test]
async fn test_reload_from_state_written_by_another_process() {
    let resources = tempfile::tempdir().unwrap();
    std::fs::write(resources.path().join("orders-openapi.yaml"), "openapi: 3.0.0").unwrap();
    std::fs::write(resources.path().join("orders-metadata.yaml"), "kind: APIMetadata").unwrap();

    let loaded = LoadedArtifactsRecord {
        primaries: vec!["orders-openapi.yaml".to_string()],
        secondaries: vec!["orders-metadata.yaml".to_string()],
    };
    let mut exposed = ExposedConfig::for_endpoints("orders", "localhost", 40000, 40001);
    exposed.record_loaded("orders", &loaded);
    let ensemble = Ensemble {
        services: vec![],
        exposed_config: exposed,
        loaded,
        main_phase: Phase::Running,
    };
    let state_dir = tempfile::tempdir().unwrap();
    let path = state_dir.path().join("state.json");
    StateFile::from_ensemble("orders", &ensemble).write(&path).unwrap();

    let state = StateFile::read(&path).unwrap().unwrap();
    let importer = Arc::new(RecordingImporter::new());
    let reconciler = HotReloadReconciler::new(
        &state.service_name,
        vec![resources.path().to_path_buf()],
        importer.clone(),
    );
    reconciler
        .on_files_changed(&state.exposed_config, &changed(&["orders-metadata.yaml"]))
        .await
        .unwrap();

    let calls = importer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, ImportKind::LocalSecondary);
    assert_eq!(calls[0].endpoint, "http://localhost:40000");
}

#[tokio::test]
async fn test_declared_artifact_under_root_reloads_on_watcher_ids() {
    let resources = tempfile::tempdir().unwrap();
    let spec = resources.path().join("orders-openapi.yaml");
    std::fs::write(&spec, "openapi: 3.0.0").unwrap();
    let roots = vec![resources.path().to_path_buf()];

    let importer = Arc::new(RecordingImporter::new());
    let local = ArtifactsConfig {
        primaries: vec![spec.display().to_string()],
        secondaries: vec![],
    };
    let loaded = ImportPipeline::new(importer.as_ref(), "http://localhost:32768")
        .with_roots(&roots)
        .import_all(None, Some(&local), &ScanResult::default())
        .await;
    assert_eq!(loaded.primaries, vec!["orders-openapi.yaml".to_string()]);

    let mut exposed = ExposedConfig::for_endpoints("default", "localhost", 32768, 32769);
    exposed.record_loaded("default", &loaded);

    let reloads = Arc::new(RecordingImporter::new());
    let reconciler = HotReloadReconciler::new("default", roots.clone(), reloads.clone());
    let batch = relative_ids(&roots, &[PathBuf::from(&spec)]);
    let outcome = reconciler.on_files_changed(&exposed, &batch).await.unwrap();

    assert_eq!(outcome.primaries, vec!["orders-openapi.yaml".to_string()]);
    let calls = reloads.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, ImportKind::LocalPrimary);
}
