//! mockbox core library
//!
//! Provisions a mock API service (plus companion workers) for local
//! development and feeds it the API artifacts found in the project.
//!
//! - [`matcher`] and [`scanner`] find and classify artifacts.
//! - [`topology`] names the ensemble members on the shared network.
//! - [`orchestrator`] reuses or launches the ensemble per configuration.
//! - [`pipeline`] imports artifacts in dependency order.
//! - [`hot_reload`] and [`watch`] re-import changed artifacts in a live session.

pub mod config;
pub mod error;
pub mod exposed;
pub mod fakes;
pub mod hot_reload;
pub mod importer;
pub mod matcher;
pub mod obs;
pub mod orchestrator;
pub mod pipeline;
pub mod scanner;
pub mod state_file;
pub mod telemetry;
pub mod topology;
pub mod watch;

pub use config::{
    ArtifactsConfig, DevServicesConfig, EnsembleSettings, LaunchMode, MockboxConfig,
    DEFAULT_CONFIG_FILE,
};
pub use error::{ImportError, MockboxError, Result};
pub use exposed::{ExposedConfig, LoadedArtifactsRecord};
pub use hot_reload::{HotReloadReconciler, ReloadOutcome};
pub use importer::{ArtifactImporter, HttpImporter};
pub use matcher::{classify, is_collection, ArtifactFormat, ArtifactRole, SuffixRule, SuffixRules};
pub use obs::{
    emit_artifact_import_failed, emit_artifact_imported, emit_close_failed, emit_cycle_started,
    emit_hot_reload, emit_service_discovered, emit_service_started, CycleSpan,
};
pub use orchestrator::lifecycle::{Phase, PhaseEvent};
pub use orchestrator::services::{ServiceRole, StartableService};
pub use orchestrator::signals::{EnsembleConfig, EnsembleSignals};
pub use orchestrator::{
    ContainerEnsembleOrchestrator, Ensemble, OrchestratorState, ProvisionContext, RunningService,
    ServiceSummary,
};
pub use pipeline::{import_all, ImportPipeline};
pub use scanner::{ArtifactDescriptor, ArtifactLocator, ArtifactScanner, ScanResult};
pub use state_file::StateFile;
pub use telemetry::init_tracing;
pub use topology::{derive_hosts, EnsembleHosts};
pub use watch::{ArtifactWatcher, WatchConfig};

/// Crate version, as reported by `mockbox info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
