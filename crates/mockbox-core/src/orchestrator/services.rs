//! The containers of an ensemble behind one [`StartableService`] trait.

use async_trait::async_trait;
use container_ensemble::{ContainerRuntime, ContainerSpec, ReadinessProbe, StartedContainer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::{DevServicesConfig, LaunchMode};
use crate::error::{MockboxError, Result};
use crate::topology::{
    EnsembleHosts, ASYNC_COMPANION_PORT, COLLECTION_RUNNER_PORT, MAIN_GRPC_PORT, MAIN_HTTP_PORT,
};

/// Label put on shared main instances; the value is the service name.
pub const SERVICE_LABEL: &str = "mockbox-dev-service";
/// Network every ensemble member joins.
pub const SHARED_NETWORK: &str = "mockbox-shared";

pub const MAIN_READY_PATTERN: &str = ".*Started MicrocksApplication.*";
pub const ASYNC_READY_PATTERN: &str = r".*Profile prod activated\..*";
pub const COLLECTION_READY_PATTERN: &str = ".*postman-runtime wrapper listening on port.*";

/// Which member of the ensemble a service is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    Main,
    AsyncMinion,
    CollectionRunner,
}

impl std::fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceRole::Main => write!(f, "main"),
            ServiceRole::AsyncMinion => write!(f, "async-minion"),
            ServiceRole::CollectionRunner => write!(f, "postman"),
        }
    }
}

/// Host-visible address of a started service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub http_port: u16,
    /// Main service only
    pub grpc_port: Option<u16>,
}

/// A container this process can start and later close.
#[async_trait]
pub trait StartableService: Send + Sync {
    fn role(&self) -> ServiceRole;

    /// Start and wait for readiness.
    async fn start(&mut self) -> Result<()>;

    /// `None` until started.
    fn connection_info(&self) -> Option<ConnectionInfo>;

    fn container_id(&self) -> Option<&str>;

    async fn close(&mut self) -> Result<()>;
}

/// Start/stop bookkeeping shared by the concrete services.
struct OwnedContainer {
    runtime: Arc<dyn ContainerRuntime>,
    spec: ContainerSpec,
    started: Option<StartedContainer>,
    info: Option<ConnectionInfo>,
}

impl OwnedContainer {
    fn new(runtime: Arc<dyn ContainerRuntime>, spec: ContainerSpec) -> Self {
        OwnedContainer {
            runtime,
            spec,
            started: None,
            info: None,
        }
    }

    /// Start, wait, then resolve `http_port` (and `grpc_port`).
    ///
    /// The container id is kept as soon as the runtime reports one, so a
    /// readiness failure still leaves something to close.
    async fn start(&mut self, service: &str, http_port: u16, grpc_port: Option<u16>) -> Result<()> {
        let started = self
            .runtime
            .start(&self.spec)
            .await
            .map_err(|source| MockboxError::Startup {
                service: service.to_string(),
                source,
            })?;
        let id = started.id.clone();
        let host = started.host.clone();
        self.started = Some(started);

        self.runtime
            .wait_ready(&id, &self.spec.readiness, self.spec.startup_timeout)
            .await
            .map_err(|source| MockboxError::Startup {
                service: service.to_string(),
                source,
            })?;

        let http = self.runtime.mapped_port(&id, http_port).await?;
        let grpc = match grpc_port {
            Some(port) => Some(self.runtime.mapped_port(&id, port).await?),
            None => None,
        };
        debug!("{} ready as {} on {}:{}", service, id, host, http);
        self.info = Some(ConnectionInfo {
            host,
            http_port: http,
            grpc_port: grpc,
        });
        Ok(())
    }

    fn container_id(&self) -> Option<&str> {
        self.started.as_ref().map(|s| s.id.as_str())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(started) = self.started.take() {
            self.info = None;
            self.runtime.stop(&started.id).await?;
        }
        Ok(())
    }
}

/// Spec fields every ensemble member shares.
fn member_spec(
    image: &str,
    alias: &str,
    config: &DevServicesConfig,
    probe: ReadinessProbe,
) -> ContainerSpec {
    ContainerSpec::new(image)
        .with_network(SHARED_NETWORK)
        .with_network_alias(alias)
        .with_access_to_host(config.access_to_host)
        .waiting_for(probe)
        .with_startup_timeout(config.startup_timeout())
}

/// The mock service itself.
pub struct MainServiceContainer {
    service_name: String,
    inner: OwnedContainer,
}

impl MainServiceContainer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: &DevServicesConfig,
        hosts: &EnsembleHosts,
        launch_mode: LaunchMode,
    ) -> Self {
        let mut spec = member_spec(
            config.image(),
            &hosts.main_alias,
            config,
            ReadinessProbe::log_message(MAIN_READY_PATTERN),
        )
        .with_exposed_port(MAIN_HTTP_PORT)
        .with_exposed_port(MAIN_GRPC_PORT)
        .with_envs(&config.container_env)
        .with_envs(&hosts.main_env());
        if launch_mode == LaunchMode::Development {
            spec = spec.with_label(SERVICE_LABEL, &config.service_name);
        }
        MainServiceContainer {
            service_name: config.service_name.clone(),
            inner: OwnedContainer::new(runtime, spec),
        }
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.inner.spec
    }
}

#[async_trait]
impl StartableService for MainServiceContainer {
    fn role(&self) -> ServiceRole {
        ServiceRole::Main
    }

    async fn start(&mut self) -> Result<()> {
        self.inner
            .start(&self.service_name, MAIN_HTTP_PORT, Some(MAIN_GRPC_PORT))
            .await
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.info.clone()
    }

    fn container_id(&self) -> Option<&str> {
        self.inner.container_id()
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Worker that serves async API mocks and can publish to a broker.
pub struct AsyncMinionContainer {
    service_name: String,
    inner: OwnedContainer,
}

impl AsyncMinionContainer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: &DevServicesConfig,
        hosts: &EnsembleHosts,
        image: &str,
        broker: Option<&str>,
    ) -> Self {
        let mut spec = member_spec(
            image,
            &hosts.async_alias,
            config,
            ReadinessProbe::log_message(ASYNC_READY_PATTERN),
        )
        .with_exposed_port(ASYNC_COMPANION_PORT)
        .with_envs(&hosts.async_companion_env());
        if let Some(broker) = broker {
            spec = spec
                .with_env("ASYNC_PROTOCOLS", ",KAFKA")
                .with_env("KAFKA_BOOTSTRAP_SERVER", broker);
        }
        AsyncMinionContainer {
            service_name: format!("{}-{}", config.service_name, ServiceRole::AsyncMinion),
            inner: OwnedContainer::new(runtime, spec),
        }
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.inner.spec
    }
}

#[async_trait]
impl StartableService for AsyncMinionContainer {
    fn role(&self) -> ServiceRole {
        ServiceRole::AsyncMinion
    }

    async fn start(&mut self) -> Result<()> {
        self.inner
            .start(&self.service_name, ASYNC_COMPANION_PORT, None)
            .await
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.info.clone()
    }

    fn container_id(&self) -> Option<&str> {
        self.inner.container_id()
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Any other companion described only by image, alias, port and probe.
/// Used for the collection runner.
pub struct GenericCompanionContainer {
    service_name: String,
    role: ServiceRole,
    port: u16,
    inner: OwnedContainer,
}

impl GenericCompanionContainer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        role: ServiceRole,
        spec: ContainerSpec,
        service_name: &str,
        port: u16,
    ) -> Self {
        GenericCompanionContainer {
            service_name: format!("{}-{}", service_name, role),
            role,
            port,
            inner: OwnedContainer::new(runtime, spec.with_exposed_port(port)),
        }
    }

    /// The collection runner reachable at the ensemble's collection alias.
    pub fn collection_runner(
        runtime: Arc<dyn ContainerRuntime>,
        config: &DevServicesConfig,
        hosts: &EnsembleHosts,
        image: &str,
    ) -> Self {
        let spec = member_spec(
            image,
            &hosts.collection_alias,
            config,
            ReadinessProbe::log_message(COLLECTION_READY_PATTERN),
        );
        Self::new(
            runtime,
            ServiceRole::CollectionRunner,
            spec,
            &config.service_name,
            COLLECTION_RUNNER_PORT,
        )
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.inner.spec
    }
}

#[async_trait]
impl StartableService for GenericCompanionContainer {
    fn role(&self) -> ServiceRole {
        self.role
    }

    async fn start(&mut self) -> Result<()> {
        self.inner.start(&self.service_name, self.port, None).await
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.info.clone()
    }

    fn container_id(&self) -> Option<&str> {
        self.inner.container_id()
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_ensemble::fakes::FakeRuntime;
    use container_ensemble::LabelSelector;

    fn hosts() -> EnsembleHosts {
        EnsembleHosts {
            main_alias: "mockbox-default-1234abcd".to_string(),
            async_alias: "mockbox-default-async-minion-abcde".to_string(),
            collection_alias: "mockbox-default-postman-fghij".to_string(),
        }
    }

    #[tokio::test]
    async fn test_main_container_wiring() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut config = DevServicesConfig::default();
        config
            .container_env
            .insert("KEYCLOAK_ENABLED".to_string(), "false".to_string());

        let mut main = MainServiceContainer::new(runtime.clone(), &config, &hosts(), LaunchMode::Development);
        let spec = main.spec().clone();
        assert!(spec.has_label(&LabelSelector::new(SERVICE_LABEL, "default")));
        assert_eq!(spec.network.as_deref(), Some(SHARED_NETWORK));
        assert_eq!(spec.network_aliases, vec![hosts().main_alias]);
        assert_eq!(spec.env["KEYCLOAK_ENABLED"], "false");
        assert_eq!(spec.env["TEST_CALLBACK_URL"], "http://mockbox-default-1234abcd:8080");
        assert_eq!(spec.readiness, ReadinessProbe::log_message(MAIN_READY_PATTERN));
        assert!(spec.access_to_host);

        assert!(main.connection_info().is_none());
        main.start().await.unwrap();
        let info = main.connection_info().unwrap();
        assert!(info.grpc_port.is_some());
        assert_ne!(Some(info.http_port), info.grpc_port);

        let id = main.container_id().unwrap().to_string();
        main.close().await.unwrap();
        assert_eq!(runtime.stopped_ids(), vec![id]);
        assert!(main.container_id().is_none());
    }

    #[tokio::test]
    async fn test_main_container_unlabeled_in_test_mode() {
        let runtime = Arc::new(FakeRuntime::new());
        let main = MainServiceContainer::new(runtime, &DevServicesConfig::default(), &hosts(), LaunchMode::Test);
        assert!(main.spec().labels.is_empty());
    }

    #[tokio::test]
    async fn test_async_minion_broker_env() {
        let runtime = Arc::new(FakeRuntime::new());
        let config = DevServicesConfig::default();
        let minion = AsyncMinionContainer::new(
            runtime,
            &config,
            &hosts(),
            "minion:1",
            Some("host.docker.internal:9092"),
        );
        let env = &minion.spec().env;
        assert_eq!(env["MICROCKS_HOST_PORT"], "mockbox-default-1234abcd:8080");
        assert_eq!(env["ASYNC_PROTOCOLS"], ",KAFKA");
        assert_eq!(env["KAFKA_BOOTSTRAP_SERVER"], "host.docker.internal:9092");
        assert_eq!(minion.spec().exposed_ports, vec![ASYNC_COMPANION_PORT]);
        assert!(minion.spec().labels.is_empty());
    }

    #[tokio::test]
    async fn test_readiness_failure_keeps_container_id() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.never_ready("runner:1");
        let mut runner = GenericCompanionContainer::collection_runner(
            runtime.clone(),
            &DevServicesConfig::default(),
            &hosts(),
            "runner:1",
        );

        let err = runner.start().await.unwrap_err();
        assert!(matches!(err, MockboxError::Startup { .. }));
        assert!(runner.container_id().is_some());
        runner.close().await.unwrap();
        assert_eq!(runtime.stopped_ids().len(), 1);
        assert_eq!(runner.role(), ServiceRole::CollectionRunner);
    }
}
