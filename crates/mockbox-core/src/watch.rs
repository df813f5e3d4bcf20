//! File watching for hot reload.
//!
//! A `notify` watcher over the scan roots feeds a debounce loop that turns
//! bursts of create/modify events into one batch of root-relative paths,
//! the same ids the scanner hands out. Declared artifacts outside every root
//! are watched through their parent directory and reported under their
//! configured path.

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::error::Result;
use crate::scanner::{declared_stable_id, stable_id_for};

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet period that closes a batch
    pub debounce: Duration,
    /// Used by polling backends only
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// A declared artifact that no scan root covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredFile {
    /// Configured path, also its stable id
    pub id: String,
    pub path: PathBuf,
}

impl DeclaredFile {
    pub fn new(configured: &str) -> Self {
        let raw = PathBuf::from(configured);
        DeclaredFile {
            id: configured.to_string(),
            path: raw.canonicalize().unwrap_or(raw),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path == self.path || path.canonicalize().is_ok_and(|p| p == self.path)
    }
}

/// Declared paths that resolve outside every root.
pub fn outside_roots(roots: &[PathBuf], declared: &[String]) -> Vec<DeclaredFile> {
    declared
        .iter()
        .filter(|path| declared_stable_id(Path::new(path), roots).is_none())
        .map(|path| DeclaredFile::new(path))
        .collect()
}

/// Watches scan roots and yields batches of changed stable ids.
pub struct ArtifactWatcher {
    _watcher: RecommendedWatcher,
    batches: mpsc::Receiver<HashSet<String>>,
}

impl ArtifactWatcher {
    /// Start watching every existing root plus the directories holding
    /// `declared` files outside them. Must be called inside a tokio runtime.
    pub fn start(roots: &[PathBuf], declared: &[String], config: WatchConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (batch_tx, batches) = mpsc::channel(16);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            NotifyConfig::default().with_poll_interval(config.poll_interval),
        )?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.is_dir() {
                debug!("Not watching missing root {}", root.display());
                continue;
            }
            watcher.watch(root, RecursiveMode::Recursive)?;
            watched.push(root.clone());
            if let Ok(canonical) = root.canonicalize() {
                if &canonical != root {
                    watched.push(canonical);
                }
            }
        }

        let outside = outside_roots(roots, declared);
        let mut parents: HashSet<PathBuf> = HashSet::new();
        for file in &outside {
            let Some(parent) = file.path.parent().filter(|p| p.is_dir()) else {
                debug!("Not watching {}, its directory is missing", file.id);
                continue;
            };
            if parents.insert(parent.to_path_buf()) {
                watcher.watch(parent, RecursiveMode::NonRecursive)?;
            }
        }

        spawn_debounce_loop(watched, outside, config.debounce, event_rx, batch_tx);
        Ok(ArtifactWatcher {
            _watcher: watcher,
            batches,
        })
    }

    /// Next debounced batch; `None` once the watcher is gone.
    pub async fn next_batch(&mut self) -> Option<HashSet<String>> {
        self.batches.recv().await
    }
}

fn spawn_debounce_loop(
    roots: Vec<PathBuf>,
    declared: Vec<DeclaredFile>,
    debounce: Duration,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    batch_tx: mpsc::Sender<HashSet<String>>,
) {
    tokio::spawn(async move {
        let mut pending: HashSet<String> = HashSet::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(Ok(evt)) => {
                        let ids = if is_content_change(&evt.kind) {
                            changed_ids(&roots, &declared, &evt.paths)
                        } else {
                            HashSet::new()
                        };
                        if !ids.is_empty() {
                            pending.extend(ids);
                            deadline = Some(Instant::now() + debounce);
                        }
                    }
                    Some(Err(err)) => warn!("Watcher error: {err}"),
                    None => break,
                },
                () = async {
                    if let Some(deadline) = deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if deadline.is_some() => {
                    deadline = None;
                    let batch = std::mem::take(&mut pending);
                    debug!("Flushing {} changed artifacts", batch.len());
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Stable ids of `paths` under the first root that contains each.
pub fn relative_ids(roots: &[PathBuf], paths: &[PathBuf]) -> HashSet<String> {
    paths
        .iter()
        .filter_map(|path| {
            roots
                .iter()
                .find_map(|root| stable_id_for(root, path))
        })
        .collect()
}

/// Like [`relative_ids`], falling back to the configured id of a matching
/// declared file. Paths matching neither are dropped.
pub fn changed_ids(
    roots: &[PathBuf],
    declared: &[DeclaredFile],
    paths: &[PathBuf],
) -> HashSet<String> {
    paths
        .iter()
        .filter_map(|path| {
            roots
                .iter()
                .find_map(|root| stable_id_for(root, path))
                .or_else(|| {
                    declared
                        .iter()
                        .find(|file| file.matches(path))
                        .map(|file| file.id.clone())
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use tempfile::tempdir;

    #[test]
    fn test_relative_ids_map_to_stable_ids() {
        let roots = vec![PathBuf::from("/p/main"), PathBuf::from("/p/test")];
        let ids = relative_ids(
            &roots,
            &[
                PathBuf::from("/p/main/orders-openapi.yaml"),
                PathBuf::from("/p/test/apis/films.graphql"),
                PathBuf::from("/elsewhere/x.proto"),
            ],
        );
        assert_eq!(
            ids,
            HashSet::from([
                "orders-openapi.yaml".to_string(),
                "apis/films.graphql".to_string()
            ])
        );
    }

    #[test]
    fn test_only_content_changes_count() {
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
    }

    #[tokio::test]
    async fn test_watcher_batches_writes() {
        let dir = tempdir().unwrap();
        let mut watcher = ArtifactWatcher::start(
            &[dir.path().to_path_buf()],
            &[],
            WatchConfig {
                debounce: Duration::from_millis(100),
                poll_interval: Duration::from_millis(100),
            },
        )
        .unwrap();

        std::fs::write(dir.path().join("orders-openapi.yaml"), "openapi: 3.0.0").unwrap();

        let batch = time::timeout(Duration::from_secs(10), watcher.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.contains("orders-openapi.yaml"));
    }

    #[test]
    fn test_declared_file_outside_roots_keeps_configured_id() {
        let root = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let inside = root.path().join("orders-openapi.yaml");
        let outside = elsewhere.path().join("films-openapi.yaml");
        std::fs::write(&inside, "openapi: 3.0.0").unwrap();
        std::fs::write(&outside, "openapi: 3.0.0").unwrap();
        let roots = vec![root.path().to_path_buf()];

        let declared = outside_roots(
            &roots,
            &[
                inside.display().to_string(),
                outside.display().to_string(),
            ],
        );
        assert_eq!(declared, vec![DeclaredFile::new(&outside.display().to_string())]);

        let ids = changed_ids(
            &roots,
            &declared,
            &[inside, outside.clone(), elsewhere.path().join("other.yaml")],
        );
        assert_eq!(
            ids,
            HashSet::from([
                "orders-openapi.yaml".to_string(),
                outside.display().to_string()
            ])
        );
    }

    #[tokio::test]
    async fn test_watcher_reports_declared_file_outside_roots() {
        let root = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let declared = elsewhere.path().join("films-openapi.yaml");
        std::fs::write(&declared, "openapi: 3.0.0").unwrap();
        let configured = declared.display().to_string();

        let mut watcher = ArtifactWatcher::start(
            &[root.path().to_path_buf()],
            std::slice::from_ref(&configured),
            WatchConfig {
                debounce: Duration::from_millis(100),
                poll_interval: Duration::from_millis(100),
            },
        )
        .unwrap();

        std::fs::write(&declared, "openapi: 3.1.0").unwrap();

        let batch = time::timeout(Duration::from_secs(10), watcher.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.contains(&configured));
    }
}
