//! Container launch descriptions and discovery results
//!
//! A [`ContainerSpec`] is everything a runtime needs to create, label,
//! network-attach and start one container. It is built with chained
//! `with_*` calls and handed to [`crate::ContainerRuntime::start`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Hostname containers use to reach the host machine
pub const HOST_GATEWAY_NAME: &str = "host.docker.internal";

/// How to decide that a freshly started container is ready to serve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessProbe {
    /// Wait until a log line matches the regular expression
    LogMessage { pattern: String },
    /// Wait until the container port accepts TCP connections on the host
    PortOpen { port: u16 },
}

impl ReadinessProbe {
    /// Probe on a log line pattern
    pub fn log_message(pattern: &str) -> Self {
        ReadinessProbe::LogMessage {
            pattern: pattern.to_string(),
        }
    }

    /// Probe on a listening container port
    pub fn port_open(port: u16) -> Self {
        ReadinessProbe::PortOpen { port }
    }
}

/// A `key=value` label filter used for discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn new(key: &str, value: &str) -> Self {
        LabelSelector {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Render as the `key=value` form runtimes accept in filters
    pub fn as_filter(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

/// Description of a container to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,
    /// Environment injected at start
    pub env: BTreeMap<String, String>,
    /// Labels attached at creation
    pub labels: BTreeMap<String, String>,
    /// Network to attach to
    pub network: Option<String>,
    /// DNS aliases on `network`
    pub network_aliases: Vec<String>,
    /// Container ports published to random host ports
    pub exposed_ports: Vec<u16>,
    /// Make the host reachable as [`HOST_GATEWAY_NAME`]
    pub access_to_host: bool,
    /// Readiness signal to wait for after start
    pub readiness: ReadinessProbe,
    /// Upper bound on the readiness wait; runtime default when `None`
    pub startup_timeout: Option<Duration>,
}

impl ContainerSpec {
    /// New spec for `image`, ready as soon as its first exposed port opens.
    pub fn new(image: &str) -> Self {
        ContainerSpec {
            image: image.to_string(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            network: None,
            network_aliases: Vec::new(),
            exposed_ports: Vec::new(),
            access_to_host: false,
            readiness: ReadinessProbe::PortOpen { port: 0 },
            startup_timeout: None,
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_envs(mut self, envs: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_network(mut self, network: &str) -> Self {
        self.network = Some(network.to_string());
        self
    }

    pub fn with_network_alias(mut self, alias: &str) -> Self {
        self.network_aliases.push(alias.to_string());
        self
    }

    pub fn with_exposed_port(mut self, port: u16) -> Self {
        if !self.exposed_ports.contains(&port) {
            self.exposed_ports.push(port);
        }
        if self.readiness == (ReadinessProbe::PortOpen { port: 0 }) {
            self.readiness = ReadinessProbe::PortOpen { port };
        }
        self
    }

    pub fn with_access_to_host(mut self, enabled: bool) -> Self {
        self.access_to_host = enabled;
        self
    }

    pub fn waiting_for(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = probe;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Whether this spec carries the given label with the given value
    pub fn has_label(&self, selector: &LabelSelector) -> bool {
        self.labels.get(&selector.key) == Some(&selector.value)
    }
}

/// A container this process has just started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedContainer {
    pub id: String,
    /// Host on which published ports are reachable
    pub host: String,
}

/// Address of a discovered, already-running container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerAddress {
    pub id: String,
    pub host: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_fields() {
        let spec = ContainerSpec::new("quay.io/microcks/microcks-uber:latest")
            .with_env("A", "1")
            .with_label("owner", "default")
            .with_network("shared")
            .with_network_alias("main")
            .with_exposed_port(8080)
            .with_exposed_port(9090)
            .with_exposed_port(8080)
            .with_access_to_host(true);

        assert_eq!(spec.env.get("A"), Some(&"1".to_string()));
        assert_eq!(spec.network.as_deref(), Some("shared"));
        assert_eq!(spec.network_aliases, vec!["main".to_string()]);
        assert_eq!(spec.exposed_ports, vec![8080, 9090]);
        assert!(spec.access_to_host);
        assert!(spec.has_label(&LabelSelector::new("owner", "default")));
        assert!(!spec.has_label(&LabelSelector::new("owner", "other")));
    }

    #[test]
    fn test_first_exposed_port_becomes_default_probe() {
        let spec = ContainerSpec::new("img").with_exposed_port(3000);
        assert_eq!(spec.readiness, ReadinessProbe::port_open(3000));

        let spec = ContainerSpec::new("img")
            .waiting_for(ReadinessProbe::log_message(".*ready.*"))
            .with_exposed_port(3000);
        assert_eq!(spec.readiness, ReadinessProbe::log_message(".*ready.*"));
    }

    #[test]
    fn test_label_selector_filter() {
        let selector = LabelSelector::new("mockbox-dev-service", "default");
        assert_eq!(selector.as_filter(), "mockbox-dev-service=default");
    }
}
