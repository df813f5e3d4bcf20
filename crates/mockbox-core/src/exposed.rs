//! Exposed configuration: the flat key/value map published for each logical
//! service, and the loaded-artifacts record carried inside it.
//!
//! Keys are namespaced `mockbox.<service>.<suffix>`. The record of loaded
//! artifacts travels through the same map (comma-joined) so a later process
//! can recover what to watch without sharing memory with the one that
//! imported them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MockboxError, Result};

pub const CONFIG_PREFIX: &str = "mockbox.";
pub const HTTP_SUFFIX: &str = ".http";
pub const HTTP_HOST_SUFFIX: &str = ".http.host";
pub const HTTP_PORT_SUFFIX: &str = ".http.port";
pub const GRPC_SUFFIX: &str = ".grpc";
pub const GRPC_HOST_SUFFIX: &str = ".grpc.host";
pub const GRPC_PORT_SUFFIX: &str = ".grpc.port";
pub const LOADED_PRIMARY_ARTIFACTS: &str = ".primary-artifacts";
pub const LOADED_SECONDARY_ARTIFACTS: &str = ".secondary-artifacts";

const HTTP_SCHEME: &str = "http://";

/// `mockbox.<service>`
pub fn config_prefix(service_name: &str) -> String {
    format!("{}{}", CONFIG_PREFIX, service_name)
}

/// Stable ids of every local artifact an import pass attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedArtifactsRecord {
    pub primaries: Vec<String>,
    pub secondaries: Vec<String>,
}

impl LoadedArtifactsRecord {
    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty() && self.secondaries.is_empty()
    }
}

/// Flat key/value configuration published for the host and later runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExposedConfig(BTreeMap<String, String>);

impl ExposedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint keys for a service reachable on `host`.
    pub fn for_endpoints(service_name: &str, host: &str, http_port: u16, grpc_port: u16) -> Self {
        let prefix = config_prefix(service_name);
        let mut map = BTreeMap::new();
        map.insert(
            format!("{prefix}{HTTP_SUFFIX}"),
            format!("{HTTP_SCHEME}{host}:{http_port}"),
        );
        map.insert(format!("{prefix}{HTTP_HOST_SUFFIX}"), host.to_string());
        map.insert(format!("{prefix}{HTTP_PORT_SUFFIX}"), http_port.to_string());
        map.insert(
            format!("{prefix}{GRPC_SUFFIX}"),
            format!("{HTTP_SCHEME}{host}:{grpc_port}"),
        );
        map.insert(format!("{prefix}{GRPC_HOST_SUFFIX}"), host.to_string());
        map.insert(format!("{prefix}{GRPC_PORT_SUFFIX}"), grpc_port.to_string());
        ExposedConfig(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.0.insert(key, value);
    }

    pub fn extend(&mut self, other: &ExposedConfig) {
        self.0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// HTTP endpoint of `service_name`, if published.
    pub fn http_url(&self, service_name: &str) -> Option<&str> {
        self.get(&format!("{}{}", config_prefix(service_name), HTTP_SUFFIX))
    }

    /// Like [`Self::http_url`] but an error when absent.
    pub fn require_http_url(&self, service_name: &str) -> Result<&str> {
        let key = format!("{}{}", config_prefix(service_name), HTTP_SUFFIX);
        self.get(&key).ok_or(MockboxError::MissingExposedKey(key))
    }

    /// Publish the loaded-artifacts record for `service_name`.
    pub fn record_loaded(&mut self, service_name: &str, record: &LoadedArtifactsRecord) {
        let prefix = config_prefix(service_name);
        self.0.insert(
            format!("{prefix}{LOADED_PRIMARY_ARTIFACTS}"),
            record.primaries.join(","),
        );
        self.0.insert(
            format!("{prefix}{LOADED_SECONDARY_ARTIFACTS}"),
            record.secondaries.join(","),
        );
    }

    /// Read back the loaded-artifacts record; missing keys read as empty.
    pub fn loaded(&self, service_name: &str) -> LoadedArtifactsRecord {
        let prefix = config_prefix(service_name);
        LoadedArtifactsRecord {
            primaries: split_list(self.get(&format!("{prefix}{LOADED_PRIMARY_ARTIFACTS}"))),
            secondaries: split_list(self.get(&format!("{prefix}{LOADED_SECONDARY_ARTIFACTS}"))),
        }
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keys() {
        let config = ExposedConfig::for_endpoints("default", "localhost", 32768, 32769);
        assert_eq!(config.get("mockbox.default.http"), Some("http://localhost:32768"));
        assert_eq!(config.get("mockbox.default.http.host"), Some("localhost"));
        assert_eq!(config.get("mockbox.default.http.port"), Some("32768"));
        assert_eq!(config.get("mockbox.default.grpc"), Some("http://localhost:32769"));
        assert_eq!(config.get("mockbox.default.grpc.port"), Some("32769"));
        assert_eq!(config.http_url("default"), Some("http://localhost:32768"));
        assert!(config.http_url("other").is_none());
    }

    #[test]
    fn test_loaded_record_survives_the_map() {
        let mut config = ExposedConfig::for_endpoints("default", "localhost", 1, 2);
        let record = LoadedArtifactsRecord {
            primaries: vec!["orders-openapi.yaml".into(), "apis/films.graphql".into()],
            secondaries: vec!["orders-postman-collection.json".into()],
        };
        config.record_loaded("default", &record);

        assert_eq!(
            config.get("mockbox.default.primary-artifacts"),
            Some("orders-openapi.yaml,apis/films.graphql")
        );
        assert_eq!(config.loaded("default"), record);
    }

    #[test]
    fn test_missing_or_empty_lists_read_as_empty() {
        let mut config = ExposedConfig::new();
        assert!(config.loaded("default").is_empty());

        config.record_loaded("default", &LoadedArtifactsRecord::default());
        assert_eq!(config.get("mockbox.default.secondary-artifacts"), Some(""));
        assert!(config.loaded("default").is_empty());
    }

    #[test]
    fn test_require_http_url_reports_key() {
        let err = ExposedConfig::new().require_http_url("orders").unwrap_err();
        assert!(err.to_string().contains("mockbox.orders.http"));
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let config = ExposedConfig::for_endpoints("default", "localhost", 1, 2);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["mockbox.default.http.port"], "1");
    }
}
