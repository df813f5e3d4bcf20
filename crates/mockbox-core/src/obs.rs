//! Structured observability hooks for ensemble and import lifecycle events.
//!
//! This module provides:
//! - Cycle-scoped tracing spans via `CycleSpan`, attached with `Instrument`
//! - Emission functions for service start/discovery, artifact import and hot reload
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`); failures at
//! `warn!`. Pass `--json` to the CLI for JSON output.

use tracing::{info, warn};
use uuid::Uuid;

/// Cycle-scoped tracing span tagged with a fresh cycle id.
///
/// Attach it to the cycle's future rather than entering it, since a cycle
/// awaits the container runtime.
///
/// # Example
///
/// ```ignore
/// let cycle = CycleSpan::new("default");
/// run_cycle().instrument(cycle.span().clone()).await;
/// ```
pub struct CycleSpan {
    cycle_id: String,
    span: tracing::Span,
}

impl CycleSpan {
    pub fn new(service_name: &str) -> Self {
        let cycle_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("mockbox.cycle", cycle_id = %cycle_id, service = %service_name);
        Self { cycle_id, span }
    }

    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Emit event: an orchestration cycle began.
pub fn emit_cycle_started(cycle_id: &str, service_name: &str, config_changed: bool) {
    info!(
        event = "ensemble.cycle_started",
        cycle_id = %cycle_id,
        service = %service_name,
        config_changed = config_changed,
    );
}

/// Emit event: a container this process owns became ready.
pub fn emit_service_started(service_name: &str, role: &str, container_id: &str) {
    info!(
        event = "service.started",
        service = %service_name,
        role = %role,
        container_id = %container_id,
    );
}

/// Emit event: a shared instance was found and reused.
pub fn emit_service_discovered(service_name: &str, container_id: &str, http_url: &str) {
    info!(
        event = "service.discovered",
        service = %service_name,
        container_id = %container_id,
        http_url = %http_url,
    );
}

/// Emit event: an artifact was accepted by the service.
pub fn emit_artifact_imported(artifact: &str, role: &str, remote: bool) {
    info!(event = "artifact.imported", artifact = %artifact, role = %role, remote = remote);
}

/// Emit event: an artifact import failed (warning level, never fatal).
pub fn emit_artifact_import_failed(artifact: &str, role: &str, error: &dyn std::fmt::Display) {
    warn!(event = "artifact.import_failed", artifact = %artifact, role = %role, error = %error);
}

/// Emit event: closing an owned container failed (warning level).
pub fn emit_close_failed(service_name: &str, container_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "service.close_failed",
        service = %service_name,
        container_id = %container_id,
        error = %error,
    );
}

/// Emit event: a hot-reload batch was processed.
pub fn emit_hot_reload(changed: usize, primaries: usize, secondaries: usize) {
    info!(
        event = "hot_reload.reimported",
        changed = changed,
        primaries = primaries,
        secondaries = secondaries,
    );
}
