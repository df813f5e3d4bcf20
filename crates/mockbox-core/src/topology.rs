//! Network naming for the ensemble.
//!
//! The main service gets an alias derived only from its service name, so a
//! later run can find it again. Companions are never shared and get a
//! random base-58 suffix per cycle so parallel sessions on one network do
//! not collide.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// HTTP port of the main mock service
pub const MAIN_HTTP_PORT: u16 = 8080;
/// gRPC port of the main mock service
pub const MAIN_GRPC_PORT: u16 = 9090;
/// HTTP port of the async companion
pub const ASYNC_COMPANION_PORT: u16 = 8081;
/// Port of the collection runner companion
pub const COLLECTION_RUNNER_PORT: u16 = 3000;

const ALIAS_PREFIX: &str = "mockbox";
const RANDOM_SUFFIX_LEN: usize = 5;
const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Network aliases for one orchestration cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleHosts {
    pub main_alias: String,
    pub async_alias: String,
    pub collection_alias: String,
}

impl EnsembleHosts {
    /// `http://` URL of the main service inside the network
    pub fn main_url(&self) -> String {
        format!("http://{}:{}", self.main_alias, MAIN_HTTP_PORT)
    }

    pub fn async_url(&self) -> String {
        format!("http://{}:{}", self.async_alias, ASYNC_COMPANION_PORT)
    }

    pub fn collection_url(&self) -> String {
        format!("http://{}:{}", self.collection_alias, COLLECTION_RUNNER_PORT)
    }

    /// Environment for the main container: where the companions will be,
    /// known before any of them starts.
    pub fn main_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("POSTMAN_RUNNER_URL".to_string(), self.collection_url()),
            ("TEST_CALLBACK_URL".to_string(), self.main_url()),
            ("ASYNC_MINION_URL".to_string(), self.async_url()),
        ])
    }

    /// Environment for the async companion: how to reach the main service.
    pub fn async_companion_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            "MICROCKS_HOST_PORT".to_string(),
            format!("{}:{}", self.main_alias, MAIN_HTTP_PORT),
        )])
    }
}

/// Derive the aliases for `service_name` using the thread RNG.
pub fn derive_hosts(service_name: &str) -> EnsembleHosts {
    derive_hosts_with(service_name, &mut rand::thread_rng())
}

/// Derive the aliases with a caller-supplied RNG.
pub fn derive_hosts_with<R: Rng + ?Sized>(service_name: &str, rng: &mut R) -> EnsembleHosts {
    let name = dns_label(service_name);
    EnsembleHosts {
        main_alias: main_alias(service_name),
        async_alias: format!(
            "{}-{}-async-minion-{}",
            ALIAS_PREFIX,
            name,
            random_suffix(rng)
        ),
        collection_alias: format!(
            "{}-{}-postman-{}",
            ALIAS_PREFIX,
            name,
            random_suffix(rng)
        ),
    }
}

/// Stable alias of the main service: sanitized name plus a short digest of
/// the raw name, so names that sanitize alike still differ.
pub fn main_alias(service_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(service_name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}-{}", ALIAS_PREFIX, dns_label(service_name), &digest[..8])
}

fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| BASE58_ALPHABET[rng.gen_range(0..BASE58_ALPHABET.len())] as char)
        .collect()
}

/// Lowercase, `[a-z0-9-]` only, no leading/trailing dash.
fn dns_label(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        "service".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_main_alias_is_stable() {
        let a = derive_hosts("default");
        let b = derive_hosts("default");
        assert_eq!(a.main_alias, b.main_alias);
        assert!(a.main_alias.starts_with("mockbox-default-"));
    }

    #[test]
    fn test_companion_aliases_are_randomized() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = derive_hosts_with("default", &mut rng);
        let b = derive_hosts_with("default", &mut rng);
        assert_ne!(a.async_alias, b.async_alias);
        assert_ne!(a.collection_alias, b.collection_alias);
        assert!(a.async_alias.starts_with("mockbox-default-async-minion-"));
        assert!(a.collection_alias.starts_with("mockbox-default-postman-"));
    }

    #[test]
    fn test_random_suffix_uses_base58() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let suffix = random_suffix(&mut rng);
            assert_eq!(suffix.len(), RANDOM_SUFFIX_LEN);
            assert!(suffix.bytes().all(|b| BASE58_ALPHABET.contains(&b)));
            assert!(!suffix.contains('0') && !suffix.contains('O') && !suffix.contains('l'));
        }
    }

    #[test]
    fn test_aliases_are_dns_safe() {
        let hosts = derive_hosts("My Service_01!");
        for alias in [&hosts.main_alias, &hosts.async_alias, &hosts.collection_alias] {
            assert!(alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-'));
            assert!(!alias.starts_with('-') && !alias.ends_with('-'));
        }
        assert!(hosts.main_alias.starts_with("mockbox-my-service-01-"));
    }

    #[test]
    fn test_sanitized_collisions_still_differ() {
        assert_ne!(main_alias("a.b"), main_alias("a_b"));
    }

    #[test]
    fn test_callback_env_wiring() {
        let hosts = EnsembleHosts {
            main_alias: "main".to_string(),
            async_alias: "minion".to_string(),
            collection_alias: "runner".to_string(),
        };
        let env = hosts.main_env();
        assert_eq!(env["POSTMAN_RUNNER_URL"], "http://runner:3000");
        assert_eq!(env["TEST_CALLBACK_URL"], "http://main:8080");
        assert_eq!(env["ASYNC_MINION_URL"], "http://minion:8081");
        assert_eq!(hosts.async_companion_env()["MICROCKS_HOST_PORT"], "main:8080");
    }
}
