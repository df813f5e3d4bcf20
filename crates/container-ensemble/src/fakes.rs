//! In-memory fake container runtime (testing only)
//!
//! `FakeRuntime` satisfies the [`ContainerRuntime`] contract without a
//! container engine. It records every started spec and stop call so tests
//! can assert on what the orchestrator asked for.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::spec::{ContainerAddress, ContainerSpec, LabelSelector, ReadinessProbe, StartedContainer};
use crate::Result;

const FIRST_HOST_PORT: u16 = 32768;

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    ports: BTreeMap<u16, u16>,
    running: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    networks: HashSet<String>,
    next_id: u64,
    next_port: u16,
    started: Vec<ContainerSpec>,
    stopped: Vec<String>,
}

impl FakeState {
    fn insert(&mut self, spec: ContainerSpec, running: bool) -> String {
        self.next_id += 1;
        let id = format!("fake{:08x}", self.next_id);
        let mut ports = BTreeMap::new();
        for port in &spec.exposed_ports {
            if self.next_port == 0 {
                self.next_port = FIRST_HOST_PORT;
            }
            ports.insert(*port, self.next_port);
            self.next_port += 1;
        }
        self.containers.insert(
            id.clone(),
            FakeContainer {
                spec,
                ports,
                running,
            },
        );
        id
    }
}

/// In-memory container runtime.
#[derive(Debug)]
pub struct FakeRuntime {
    available: bool,
    state: Mutex<FakeState>,
    start_calls: AtomicUsize,
    failing_images: Mutex<HashSet<String>>,
    never_ready_images: Mutex<HashSet<String>>,
    failing_stops: Mutex<HashSet<String>>,
    discovery_barrier: Option<Arc<Barrier>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// A reachable runtime with no containers.
    pub fn new() -> Self {
        FakeRuntime {
            available: true,
            state: Mutex::new(FakeState::default()),
            start_calls: AtomicUsize::new(0),
            failing_images: Mutex::new(HashSet::new()),
            never_ready_images: Mutex::new(HashSet::new()),
            failing_stops: Mutex::new(HashSet::new()),
            discovery_barrier: None,
        }
    }

    /// A runtime that reports itself unreachable.
    pub fn unavailable() -> Self {
        FakeRuntime {
            available: false,
            ..Self::new()
        }
    }

    /// Make every `locate` call wait until `parties` callers are inside it.
    ///
    /// Lets a test force concurrent cycles to all reach discovery before any
    /// of them starts a container.
    pub fn with_discovery_barrier(mut self, parties: usize) -> Self {
        self.discovery_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// Register an already-running container (as if started by another
    /// process). Returns its id.
    pub fn add_running_container(&self, spec: ContainerSpec) -> String {
        self.state.lock().unwrap().insert(spec, true)
    }

    /// Make `start` fail for this image.
    pub fn fail_start_for(&self, image: &str) {
        self.failing_images.lock().unwrap().insert(image.to_string());
    }

    /// Make `wait_ready` time out for this image.
    pub fn never_ready(&self, image: &str) {
        self.never_ready_images
            .lock()
            .unwrap()
            .insert(image.to_string());
    }

    /// Make `stop` fail for containers started from this image.
    pub fn fail_stop_for(&self, image: &str) {
        self.failing_stops.lock().unwrap().insert(image.to_string());
    }

    /// Number of `start` calls, successful or not.
    pub fn start_count(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Specs of every container successfully started through this runtime.
    pub fn started_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().started.clone()
    }

    /// Ids passed to `stop`, in call order.
    pub fn stopped_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// Ids of containers still running.
    pub fn running_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Spec of a running container by id.
    pub fn spec_of(&self, container_id: &str) -> Option<ContainerSpec> {
        let state = self.state.lock().unwrap();
        state.containers.get(container_id).map(|c| c.spec.clone())
    }

    /// Networks created so far.
    pub fn networks(&self) -> HashSet<String> {
        self.state.lock().unwrap().networks.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        if !self.available {
            return Err(RuntimeError::Unavailable("fake runtime offline".into()));
        }
        self.state.lock().unwrap().networks.insert(name.to_string());
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(RuntimeError::Unavailable("fake runtime offline".into()));
        }
        if self.failing_images.lock().unwrap().contains(&spec.image) {
            return Err(RuntimeError::CommandFailed {
                command: format!("run {}", spec.image),
                stderr: "pull access denied".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.started.push(spec.clone());
        let id = state.insert(spec.clone(), true);
        Ok(StartedContainer {
            id,
            host: "localhost".to_string(),
        })
    }

    async fn wait_ready(
        &self,
        container_id: &str,
        _probe: &ReadinessProbe,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let image = self
            .spec_of(container_id)
            .map(|s| s.image)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        if self.never_ready_images.lock().unwrap().contains(&image) {
            return Err(RuntimeError::ReadinessTimeout {
                container_id: container_id.to_string(),
                timeout_secs: timeout.map(|t| t.as_secs()).unwrap_or(60),
            });
        }
        Ok(())
    }

    async fn mapped_port(&self, container_id: &str, container_port: u16) -> Result<u16> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .get(container_id)
            .and_then(|c| c.ports.get(&container_port).copied())
            .ok_or_else(|| {
                RuntimeError::InvalidOutput(format!(
                    "{} does not publish {}",
                    container_id, container_port
                ))
            })
    }

    async fn locate(
        &self,
        selector: &LabelSelector,
        container_port: u16,
    ) -> Result<Option<ContainerAddress>> {
        if let Some(barrier) = &self.discovery_barrier {
            barrier.wait().await;
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.running && c.spec.has_label(selector))
            .find_map(|(id, c)| {
                c.ports.get(&container_port).map(|port| ContainerAddress {
                    id: id.clone(),
                    host: "localhost".to_string(),
                    port: *port,
                })
            }))
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stopped.push(container_id.to_string());
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        if self
            .failing_stops
            .lock()
            .unwrap()
            .contains(&container.spec.image)
        {
            return Err(RuntimeError::CommandFailed {
                command: format!("rm -f {}", container_id),
                stderr: "device or resource busy".to_string(),
            });
        }
        container.running = false;
        Ok(())
    }
}
