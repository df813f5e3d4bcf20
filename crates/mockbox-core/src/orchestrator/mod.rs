//! Ensemble orchestration.
//!
//! One [`ContainerEnsembleOrchestrator`] per process decides, for the
//! configured logical service, whether to reuse a shared instance or launch
//! its own, feeds it artifacts, then adds the companions the configuration
//! or the environment call for. A cycle with unchanged configuration is
//! served from [`OrchestratorState`] without touching the runtime.

pub mod lifecycle;
pub mod services;
pub mod signals;

use container_ensemble::{ContainerAddress, ContainerRuntime, LabelSelector, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::config::{DevServicesConfig, LaunchMode};
use crate::error::{MockboxError, Result};
use crate::exposed::{ExposedConfig, LoadedArtifactsRecord};
use crate::importer::ArtifactImporter;
use crate::obs::{self, CycleSpan};
use crate::pipeline::ImportPipeline;
use crate::scanner::{ArtifactScanner, ScanResult};
use crate::topology::{derive_hosts, EnsembleHosts, MAIN_GRPC_PORT, MAIN_HTTP_PORT};

use lifecycle::{resolve_discovery, Discovery, Phase, PhaseEvent, ServiceLifecycle};
use services::{
    AsyncMinionContainer, GenericCompanionContainer, MainServiceContainer, ServiceRole,
    StartableService, SERVICE_LABEL, SHARED_NETWORK,
};
use signals::{EnsembleConfig, EnsembleSignals};

/// Host-side inputs of a cycle that are not part of the compared config.
#[derive(Debug, Clone, Default)]
pub struct ProvisionContext {
    pub launch_mode: LaunchMode,
    pub scan_roots: Vec<PathBuf>,
    /// Configuration published by other dev services (broker addresses, ...)
    pub global_config: BTreeMap<String, String>,
}

/// Handle used to stop a service this process started.
pub type CloseHandle = Box<dyn StartableService>;

/// A service that is part of the current ensemble.
pub struct RunningService {
    pub logical_name: String,
    pub role: ServiceRole,
    pub container_id: String,
    pub exposed_config: ExposedConfig,
    /// `None` for discovered instances, which are never closed by us
    close_handle: Option<CloseHandle>,
}

impl RunningService {
    fn owned(logical_name: &str, service: CloseHandle, exposed_config: ExposedConfig) -> Self {
        RunningService {
            logical_name: logical_name.to_string(),
            role: service.role(),
            container_id: service.container_id().unwrap_or_default().to_string(),
            exposed_config,
            close_handle: Some(service),
        }
    }

    fn discovered(logical_name: &str, container_id: &str, exposed_config: ExposedConfig) -> Self {
        RunningService {
            logical_name: logical_name.to_string(),
            role: ServiceRole::Main,
            container_id: container_id.to_string(),
            exposed_config,
            close_handle: None,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.close_handle.is_some()
    }

    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            logical_name: self.logical_name.clone(),
            role: self.role,
            container_id: self.container_id.clone(),
            owned: self.is_owned(),
        }
    }

    /// Close if owned. Failures are logged, never returned.
    async fn close(&mut self) {
        let Some(mut handle) = self.close_handle.take() else {
            debug!("Leaving shared instance {} running", self.container_id);
            return;
        };
        if let Err(e) = handle.close().await {
            obs::emit_close_failed(&self.logical_name, &self.container_id, &e);
        }
    }
}

/// Plain view of a running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub logical_name: String,
    pub role: ServiceRole,
    pub container_id: String,
    pub owned: bool,
}

/// What a cycle produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ensemble {
    pub services: Vec<ServiceSummary>,
    /// Endpoint keys plus the loaded-artifacts record
    pub exposed_config: ExposedConfig,
    pub loaded: LoadedArtifactsRecord,
    pub main_phase: Phase,
}

/// Process-wide orchestration state.
#[derive(Default)]
pub struct OrchestratorState {
    running: Vec<RunningService>,
    captured_config: Option<DevServicesConfig>,
    hosts: Option<EnsembleHosts>,
    ensemble: Option<Ensemble>,
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self) -> &[RunningService] {
        &self.running
    }

    pub fn hosts(&self) -> Option<&EnsembleHosts> {
        self.hosts.as_ref()
    }

    pub fn ensemble(&self) -> Option<&Ensemble> {
        self.ensemble.as_ref()
    }

    /// Close every owned service, newest first, and forget the cycle.
    pub async fn shutdown(&mut self) {
        while let Some(mut service) = self.running.pop() {
            service.close().await;
        }
        self.captured_config = None;
        self.hosts = None;
        self.ensemble = None;
    }
}

/// Companions are never attached to a shared instance; say so when the
/// configuration asked for them explicitly.
fn warn_skipped_companions(config: &DevServicesConfig) {
    let settings = config.ensemble_settings();
    let requested: Vec<&str> = [
        (settings.async_enabled, "async"),
        (settings.postman_enabled, "postman"),
    ]
    .into_iter()
    .filter_map(|(enabled, name)| enabled.then_some(name))
    .collect();

    if requested.is_empty() {
        debug!("Reusing a shared instance, companions are left to its owner");
    } else {
        warn!(
            "Reusing a shared '{}' instance: requested companions ({}) were not started",
            config.service_name,
            requested.join(", ")
        );
    }
}

pub struct ContainerEnsembleOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    importer: Arc<dyn ArtifactImporter>,
    state: OrchestratorState,
}

impl ContainerEnsembleOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, importer: Arc<dyn ArtifactImporter>) -> Self {
        ContainerEnsembleOrchestrator {
            runtime,
            importer,
            state: OrchestratorState::new(),
        }
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    /// Run one cycle.
    ///
    /// `Ok(None)` when the feature is disabled or no runtime is reachable.
    /// Startup failures of owned containers are returned after closing
    /// whatever this cycle had already started.
    pub async fn provision(
        &mut self,
        config: &DevServicesConfig,
        ctx: &ProvisionContext,
    ) -> Result<Option<Ensemble>> {
        if self.state.captured_config.as_ref() == Some(config) {
            debug!("Configuration unchanged, keeping current ensemble");
            return Ok(self.state.ensemble.clone());
        }

        let cycle = CycleSpan::new(&config.service_name);
        let span = cycle.span().clone();
        self.provision_changed(config, ctx, cycle.cycle_id())
            .instrument(span)
            .await
    }

    async fn provision_changed(
        &mut self,
        config: &DevServicesConfig,
        ctx: &ProvisionContext,
        cycle_id: &str,
    ) -> Result<Option<Ensemble>> {
        let changed = self.state.captured_config.is_some();
        obs::emit_cycle_started(cycle_id, &config.service_name, changed);
        if changed {
            info!("Configuration changed, restarting {}", config.service_name);
            self.state.shutdown().await;
        }

        let mut lifecycle = ServiceLifecycle::new(&config.service_name);
        if !config.enabled {
            debug!("Not starting mock services as they are disabled in the config");
            lifecycle.advance(PhaseEvent::FeatureDisabled)?;
            self.state.captured_config = Some(config.clone());
            return Ok(None);
        }

        if !self.runtime.is_available().await {
            warn!("No working container runtime found, mock services will not be started");
            return Ok(None);
        }

        let mut cycle = Vec::new();
        match self.run_cycle(config, ctx, &mut lifecycle, &mut cycle).await {
            Ok(ensemble) => {
                self.state.running = cycle;
                self.state.captured_config = Some(config.clone());
                self.state.ensemble = Some(ensemble.clone());
                Ok(Some(ensemble))
            }
            Err(e) => {
                warn!("Cycle for {} failed, closing what it started", config.service_name);
                while let Some(mut service) = cycle.pop() {
                    service.close().await;
                }
                self.state.hosts = None;
                Err(e)
            }
        }
    }

    /// Close owned services and forget the captured configuration.
    pub async fn shutdown(&mut self) {
        self.state.shutdown().await;
    }

    async fn run_cycle(
        &mut self,
        config: &DevServicesConfig,
        ctx: &ProvisionContext,
        lifecycle: &mut ServiceLifecycle,
        cycle: &mut Vec<RunningService>,
    ) -> Result<Ensemble> {
        let name = config.service_name.as_str();

        let sharing = config.shared && ctx.launch_mode == LaunchMode::Development;
        let discovery = if sharing {
            lifecycle.advance(PhaseEvent::SharingPermitted)?;
            let found = self.discover(name).await;
            lifecycle.advance(found.event())?;
            found
        } else {
            lifecycle.advance(PhaseEvent::SharingNotPermitted)?;
            Discovery::Miss
        };

        let mut exposed = match discovery {
            Discovery::Found {
                container_id,
                host,
                http_port,
                grpc_port,
            } => {
                let exposed = ExposedConfig::for_endpoints(name, &host, http_port, grpc_port);
                obs::emit_service_discovered(
                    name,
                    &container_id,
                    exposed.http_url(name).unwrap_or_default(),
                );
                cycle.push(RunningService::discovered(name, &container_id, exposed.clone()));
                exposed
            }
            Discovery::Miss => {
                let exposed = self.launch_main(config, ctx, cycle).await?;
                lifecycle.advance(PhaseEvent::Ready)?;
                exposed
            }
        };

        let scan = ArtifactScanner::new(ctx.scan_roots.clone()).scan();
        let endpoint = exposed.require_http_url(name)?.to_string();
        let loaded = ImportPipeline::new(self.importer.as_ref(), &endpoint)
            .with_roots(&ctx.scan_roots)
            .import_all(
                config.remote_artifacts.as_ref(),
                config.artifacts.as_ref(),
                &scan,
            )
            .await;
        exposed.record_loaded(name, &loaded);

        if lifecycle.phase().is_owned() {
            self.start_companions(config, ctx, &scan, cycle).await?;
        } else {
            warn_skipped_companions(config);
        }

        info!(
            "The '{}' mock service is ready on {}",
            name,
            exposed.http_url(name).unwrap_or_default()
        );
        Ok(Ensemble {
            services: cycle.iter().map(RunningService::summary).collect(),
            exposed_config: exposed,
            loaded,
            main_phase: lifecycle.phase(),
        })
    }

    /// Look up both ports of a labeled instance. Lookup errors count as a miss.
    async fn discover(&self, service_name: &str) -> Discovery {
        let selector = LabelSelector::new(SERVICE_LABEL, service_name);
        let http = self.locate(&selector, MAIN_HTTP_PORT).await;
        let grpc = self.locate(&selector, MAIN_GRPC_PORT).await;
        let discovery = resolve_discovery(http, grpc);
        if discovery == Discovery::Miss {
            debug!("No shared instance labeled {}", selector.as_filter());
        }
        discovery
    }

    async fn locate(
        &self,
        selector: &LabelSelector,
        port: u16,
    ) -> Option<ContainerAddress> {
        match self.runtime.locate(selector, port).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Lookup of {} port {} failed: {}", selector.as_filter(), port, e);
                None
            }
        }
    }

    async fn launch_main(
        &mut self,
        config: &DevServicesConfig,
        ctx: &ProvisionContext,
        cycle: &mut Vec<RunningService>,
    ) -> Result<ExposedConfig> {
        let hosts = derive_hosts(&config.service_name);
        self.runtime.ensure_network(SHARED_NETWORK).await?;

        let mut main =
            MainServiceContainer::new(self.runtime.clone(), config, &hosts, ctx.launch_mode);
        let started = main.start().await;
        let info = main.connection_info();
        let container_id = main.container_id().map(str::to_string);
        if container_id.is_some() {
            cycle.push(RunningService::owned(
                &config.service_name,
                Box::new(main),
                ExposedConfig::new(),
            ));
        }
        started?;
        self.state.hosts = Some(hosts);

        let (Some(info), Some(container_id)) = (info, container_id) else {
            return Err(MockboxError::Startup {
                service: config.service_name.clone(),
                source: RuntimeError::InvalidOutput("main service reported no address".to_string()),
            });
        };
        let exposed = ExposedConfig::for_endpoints(
            &config.service_name,
            &info.host,
            info.http_port,
            info.grpc_port.unwrap_or_default(),
        );
        if let Some(service) = cycle.last_mut() {
            service.exposed_config = exposed.clone();
        }
        obs::emit_service_started(&config.service_name, "main", &container_id);
        Ok(exposed)
    }

    async fn start_companions(
        &mut self,
        config: &DevServicesConfig,
        ctx: &ProvisionContext,
        scan: &ScanResult,
        cycle: &mut Vec<RunningService>,
    ) -> Result<()> {
        let Some(hosts) = self.state.hosts.clone() else {
            return Ok(());
        };
        let signals = EnsembleSignals::observe(&ctx.global_config, scan.collection_present);
        let plan = EnsembleConfig::resolve(&config.ensemble_settings(), &signals);

        if plan.collection_enabled {
            debug!("Starting the collection runner companion");
            let runner = GenericCompanionContainer::collection_runner(
                self.runtime.clone(),
                config,
                &hosts,
                &plan.collection_image,
            );
            self.start_companion(&config.service_name, Box::new(runner), cycle)
                .await?;
        }

        if plan.async_enabled {
            debug!("Starting the async companion");
            let minion = AsyncMinionContainer::new(
                self.runtime.clone(),
                config,
                &hosts,
                &plan.async_image,
                signals.broker.as_deref(),
            );
            self.start_companion(&config.service_name, Box::new(minion), cycle)
                .await?;
        }
        Ok(())
    }

    async fn start_companion(
        &self,
        service_name: &str,
        mut companion: CloseHandle,
        cycle: &mut Vec<RunningService>,
    ) -> Result<()> {
        let started = companion.start().await;
        let role = companion.role();
        if companion.container_id().is_some() {
            let service = RunningService::owned(service_name, companion, ExposedConfig::new());
            if started.is_ok() {
                obs::emit_service_started(service_name, &role.to_string(), &service.container_id);
            }
            cycle.push(service);
        }
        started
    }
}
