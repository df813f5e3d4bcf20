//! Deciding which companions to run.
//!
//! A companion runs when it is switched on explicitly or when the
//! environment suggests it is needed: a message broker in the global
//! configuration for the async companion, a request collection among the
//! scanned artifacts for the collection runner.

use container_ensemble::HOST_GATEWAY_NAME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{EnsembleSettings, DEFAULT_ASYNC_IMAGE, DEFAULT_COLLECTION_IMAGE};

/// Global configuration key announcing a Kafka broker.
pub const KAFKA_BOOTSTRAP_KEY: &str = "kafka.bootstrap.servers";

const PLAINTEXT_SCHEME: &str = "PLAINTEXT://";

/// What was observed about the environment in this cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsembleSignals {
    /// Broker address as seen from inside a container
    pub broker: Option<String>,
    pub collection_present: bool,
}

impl EnsembleSignals {
    pub fn observe(global_config: &BTreeMap<String, String>, collection_present: bool) -> Self {
        EnsembleSignals {
            broker: global_config
                .get(KAFKA_BOOTSTRAP_KEY)
                .map(|raw| broker_address(raw))
                .filter(|addr| !addr.is_empty()),
            collection_present,
        }
    }
}

/// Reduce a bootstrap-servers value to one `host:port` reachable from a
/// container: the `PLAINTEXT://` listener if listed, otherwise the first
/// entry, with `localhost` mapped to the host gateway.
pub fn broker_address(raw: &str) -> String {
    let entries: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect();
    let chosen = entries
        .iter()
        .copied()
        .find_map(|e| e.strip_prefix(PLAINTEXT_SCHEME))
        .or_else(|| entries.first().copied().map(strip_scheme))
        .unwrap_or_default();
    chosen.replace("localhost", HOST_GATEWAY_NAME)
}

fn strip_scheme(entry: &str) -> &str {
    match entry.find("://") {
        Some(idx) => &entry[idx + 3..],
        None => entry,
    }
}

/// Resolved companion plan for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub async_enabled: bool,
    pub async_image: String,
    pub collection_enabled: bool,
    pub collection_image: String,
}

impl EnsembleConfig {
    /// Explicit flag OR inferred signal, per companion.
    pub fn resolve(settings: &EnsembleSettings, signals: &EnsembleSignals) -> Self {
        EnsembleConfig {
            async_enabled: settings.async_enabled || signals.broker.is_some(),
            async_image: settings
                .async_image_name
                .clone()
                .unwrap_or_else(|| DEFAULT_ASYNC_IMAGE.to_string()),
            collection_enabled: settings.postman_enabled || signals.collection_present,
            collection_image: settings
                .postman_image_name
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION_IMAGE.to_string()),
        }
    }
}
