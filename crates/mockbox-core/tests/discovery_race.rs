//! Concurrent cycles for the same shared service.

use container_ensemble::fakes::FakeRuntime;
use mockbox_core::fakes::RecordingImporter;
use mockbox_core::{
    ContainerEnsembleOrchestrator, DevServicesConfig, LaunchMode, Phase, ProvisionContext,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_cycles_both_launch() {
    // both cycles are inside discovery before either starts a container
    let runtime = Arc::new(FakeRuntime::new().with_discovery_barrier(2));
    let importer = Arc::new(RecordingImporter::new());
    let mut first = ContainerEnsembleOrchestrator::new(runtime.clone(), importer.clone());
    let mut second = ContainerEnsembleOrchestrator::new(runtime.clone(), importer.clone());

    let config = DevServicesConfig::default();
    let ctx = ProvisionContext {
        launch_mode: LaunchMode::Development,
        ..ProvisionContext::default()
    };

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            first.provision(&config, &ctx),
            second.provision(&config, &ctx)
        )
    })
    .await
    .expect("discovery deadlocked");

    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();
    assert_eq!(a.main_phase, Phase::Running);
    assert_eq!(b.main_phase, Phase::Running);
    assert_ne!(a.services[0].container_id, b.services[0].container_id);
    assert_eq!(runtime.start_count(), 2);
    assert_eq!(runtime.running_ids().len(), 2);

    first.shutdown().await;
    second.shutdown().await;
    assert!(runtime.running_ids().is_empty());
}
