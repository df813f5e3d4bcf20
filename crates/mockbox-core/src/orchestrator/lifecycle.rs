//! Per-service lifecycle: discovery versus launch as an explicit transition table.

use container_ensemble::ContainerAddress;
use serde::{Deserialize, Serialize};

use crate::error::{MockboxError, Result};

/// Where a logical service is in one orchestration cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unconfigured,
    /// Feature switched off; terminal for the cycle
    Disabled,
    /// Looking for a labeled instance started by someone else
    Discovering,
    /// Reusing a shared instance; never closed by us
    Discovered,
    Launching,
    Running,
    Stopped,
}

/// Inputs that move a service between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEvent {
    FeatureDisabled,
    /// Shared flag set and launch mode is development
    SharingPermitted,
    SharingNotPermitted,
    /// HTTP and gRPC ports both resolved on a labeled container
    BothPortsLocated,
    LocatorMiss,
    Ready,
    /// Owned instance closed, or shared instance released
    Closed,
}

impl Phase {
    /// Next phase, or `None` if `event` is not accepted here.
    pub fn on(self, event: PhaseEvent) -> Option<Phase> {
        use Phase::*;
        use PhaseEvent::*;

        match (self, event) {
            (Unconfigured | Stopped, FeatureDisabled) => Some(Disabled),
            (Unconfigured | Stopped, SharingPermitted) => Some(Discovering),
            (Unconfigured | Stopped, SharingNotPermitted) => Some(Launching),
            (Discovering, BothPortsLocated) => Some(Discovered),
            (Discovering, LocatorMiss) => Some(Launching),
            (Launching, Ready) => Some(Running),
            (Running | Discovered, Closed) => Some(Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Disabled)
    }

    /// Whether a container in this phase was started by this process.
    pub fn is_owned(&self) -> bool {
        matches!(self, Phase::Launching | Phase::Running)
    }
}

/// Phase tracker for one logical service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLifecycle {
    service: String,
    phase: Phase,
}

impl ServiceLifecycle {
    pub fn new(service: &str) -> Self {
        ServiceLifecycle {
            service: service.to_string(),
            phase: Phase::Unconfigured,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply `event`, failing on a transition the table does not allow.
    pub fn advance(&mut self, event: PhaseEvent) -> Result<Phase> {
        let next = self
            .phase
            .on(event)
            .ok_or_else(|| MockboxError::IllegalTransition {
                service: self.service.clone(),
                from: self.phase,
                event,
            })?;
        tracing::trace!(service = %self.service, from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
        Ok(next)
    }
}

/// Result of probing for a shared instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found {
        container_id: String,
        host: String,
        http_port: u16,
        grpc_port: u16,
    },
    Miss,
}

impl Discovery {
    pub fn event(&self) -> PhaseEvent {
        match self {
            Discovery::Found { .. } => PhaseEvent::BothPortsLocated,
            Discovery::Miss => PhaseEvent::LocatorMiss,
        }
    }
}

/// Combine the two port lookups. Both must hit the same container;
/// anything less is a miss.
pub fn resolve_discovery(
    http: Option<ContainerAddress>,
    grpc: Option<ContainerAddress>,
) -> Discovery {
    match (http, grpc) {
        (Some(http), Some(grpc)) if http.id == grpc.id => Discovery::Found {
            container_id: http.id,
            host: http.host,
            http_port: http.port,
            grpc_port: grpc.port,
        },
        _ => Discovery::Miss,
    }
}
