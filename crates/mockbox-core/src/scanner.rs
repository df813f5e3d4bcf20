//! Artifact discovery in resource directories.
//!
//! Walks each root at most two levels deep, classifies regular files by
//! suffix and keys them by their root-relative path. That relative path is
//! the stable id later matched against file-watcher notifications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::matcher::{classify, is_collection, ArtifactFormat, ArtifactRole, SuffixRule, SuffixRules};

/// Directory levels below a root that are searched.
pub const MAX_SCAN_DEPTH: usize = 2;

/// Where the bytes of an artifact come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLocator {
    /// Local file, transferred by us
    Path(PathBuf),
    /// Remote URL, fetched by the service itself
    Url(String),
}

impl std::fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactLocator::Path(p) => write!(f, "{}", p.display()),
            ArtifactLocator::Url(u) => write!(f, "{}", u),
        }
    }
}

/// A classified artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub locator: ArtifactLocator,
    /// Root-relative path; declared artifacts outside every root keep the
    /// configured string
    pub stable_id: String,
    pub role: ArtifactRole,
    pub format: ArtifactFormat,
}

impl ArtifactDescriptor {
    /// Descriptor for a file discovered under a scan root.
    pub fn scanned(path: PathBuf, stable_id: String, role: ArtifactRole, format: ArtifactFormat) -> Self {
        ArtifactDescriptor {
            locator: ArtifactLocator::Path(path),
            stable_id,
            role,
            format,
        }
    }

    /// Descriptor for a file declared in configuration.
    pub fn declared(path: &str, role: ArtifactRole) -> Self {
        let format = file_name_of(path)
            .and_then(|name| classify(&name, SuffixRules::standard().all()))
            .map(|(_, format)| format)
            .unwrap_or(ArtifactFormat::Unspecified);
        ArtifactDescriptor {
            locator: ArtifactLocator::Path(PathBuf::from(path)),
            stable_id: path.to_string(),
            role,
            format,
        }
    }

    /// Declared artifact keyed like a scanned one when it lies under one of
    /// `roots`, so change notifications for the file match its id.
    pub fn declared_under(path: &str, role: ArtifactRole, roots: &[PathBuf]) -> Self {
        let mut artifact = Self::declared(path, role);
        if let Some(stable_id) = declared_stable_id(Path::new(path), roots) {
            artifact.stable_id = stable_id;
        }
        artifact
    }

    /// Descriptor for a remote artifact URL.
    pub fn remote(url: &str, role: ArtifactRole) -> Self {
        ArtifactDescriptor {
            locator: ArtifactLocator::Url(url.to_string()),
            stable_id: url.to_string(),
            role,
            format: ArtifactFormat::Unspecified,
        }
    }
}

fn file_name_of(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
}

/// Outcome of one scan. Consumers must treat the maps as sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub primaries: BTreeMap<String, ArtifactDescriptor>,
    pub secondaries: BTreeMap<String, ArtifactDescriptor>,
    pub collection_present: bool,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty() && self.secondaries.is_empty()
    }
}

/// Scans a fixed set of resource roots.
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    roots: Vec<PathBuf>,
    rules: SuffixRules,
}

impl ArtifactScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        ArtifactScanner {
            roots,
            rules: SuffixRules::standard(),
        }
    }

    pub fn with_rules(mut self, rules: SuffixRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Run the primary pass, then the secondary pass only if it found
    /// something to attach secondaries to.
    pub fn scan(&self) -> ScanResult {
        let mut result = ScanResult::default();

        let primary_rules = self.rules.for_role(ArtifactRole::Primary);
        result.primaries = self.collect(&primary_rules, &mut result.collection_present);

        if !result.primaries.is_empty() {
            let secondary_rules = self.rules.for_role(ArtifactRole::Secondary);
            result.secondaries = self.collect(&secondary_rules, &mut result.collection_present);
        }

        debug!(
            primaries = result.primaries.len(),
            secondaries = result.secondaries.len(),
            collection_present = result.collection_present,
            "Artifact scan finished"
        );
        result
    }

    fn collect(
        &self,
        rules: &[SuffixRule],
        collection_present: &mut bool,
    ) -> BTreeMap<String, ArtifactDescriptor> {
        let mut found = BTreeMap::new();
        for root in &self.roots {
            for (path, stable_id) in list_files(root) {
                let name = match path.file_name() {
                    Some(n) => n.to_string_lossy().to_string(),
                    None => continue,
                };
                if is_collection(&name) {
                    *collection_present = true;
                }
                let Some((role, format)) = classify(&name, rules) else {
                    continue;
                };
                if found.contains_key(&stable_id) {
                    warn!(
                        "Artifact {} found under several roots, keeping the first",
                        stable_id
                    );
                    continue;
                }
                found.insert(
                    stable_id.clone(),
                    ArtifactDescriptor::scanned(path, stable_id, role, format),
                );
            }
        }
        found
    }
}

/// Convenience wrapper over [`ArtifactScanner`].
pub fn scan(roots: &[PathBuf], rules: &SuffixRules) -> ScanResult {
    ArtifactScanner::new(roots.to_vec())
        .with_rules(rules.clone())
        .scan()
}

/// Regular files up to [`MAX_SCAN_DEPTH`] below `root`, with their stable ids.
/// A missing root yields nothing.
fn list_files(root: &Path) -> Vec<(PathBuf, String)> {
    if !root.is_dir() {
        return Vec::new();
    }

    WalkDir::new(root)
        .max_depth(MAX_SCAN_DEPTH)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let path = e.into_path();
            let stable_id = stable_id_for(root, &path)?;
            Some((path, stable_id))
        })
        .collect()
}

/// Root-relative, `/`-separated path.
pub fn stable_id_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Root-relative id of a declared file under the first root containing it.
///
/// Both sides are canonicalized first so relative or symlinked spellings of
/// the same file resolve alike; the literal paths are tried as a fallback
/// for files that do not exist yet.
pub fn declared_stable_id(path: &Path, roots: &[PathBuf]) -> Option<String> {
    let canonical = path.canonicalize().ok();
    roots.iter().find_map(|root| {
        canonical
            .as_ref()
            .and_then(|file| stable_id_for(&root.canonicalize().ok()?, file))
            .or_else(|| stable_id_for(root, path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"{}").unwrap();
    }

    fn ids(map: &BTreeMap<String, ArtifactDescriptor>) -> BTreeSet<String> {
        map.keys().cloned().collect()
    }

    #[test]
    fn test_scan_partitions_by_role() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("orders-openapi.yaml"));
        touch(&dir.path().join("orders-postman-collection.json"));
        touch(&dir.path().join("notes.txt"));

        let result = ArtifactScanner::new(vec![dir.path().to_path_buf()]).scan();

        assert_eq!(ids(&result.primaries), BTreeSet::from(["orders-openapi.yaml".to_string()]));
        assert_eq!(
            ids(&result.secondaries),
            BTreeSet::from(["orders-postman-collection.json".to_string()])
        );
        assert!(result.collection_present);
        let primary = &result.primaries["orders-openapi.yaml"];
        assert_eq!(primary.format, ArtifactFormat::OpenApi);
        assert_eq!(
            primary.locator,
            ArtifactLocator::Path(dir.path().join("orders-openapi.yaml"))
        );
    }

    #[test]
    fn test_collection_flag_false_without_collection() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("foo-openapi.yaml"));

        let result = ArtifactScanner::new(vec![dir.path().to_path_buf()]).scan();
        assert!(!result.collection_present);
        assert_eq!(result.primaries.len(), 1);
    }

    #[test]
    fn test_collection_flag_raised_without_primaries() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("foo-postman-collection.json"));

        let result = ArtifactScanner::new(vec![dir.path().to_path_buf()]).scan();
        assert!(result.collection_present);
        assert!(result.is_empty());
    }

    #[test]
    fn test_secondary_pass_skipped_without_primaries() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("orders-metadata.yaml"));
        touch(&dir.path().join("traffic.har"));

        let result = ArtifactScanner::new(vec![dir.path().to_path_buf()]).scan();
        assert!(result.primaries.is_empty());
        assert!(result.secondaries.is_empty());
    }

    #[test]
    fn test_depth_is_bounded_to_two_levels() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("top-openapi.yaml"));
        touch(&dir.path().join("apis/nested-openapi.yaml"));
        touch(&dir.path().join("apis/v1/too-deep-openapi.yaml"));

        let result = ArtifactScanner::new(vec![dir.path().to_path_buf()]).scan();
        assert_eq!(
            ids(&result.primaries),
            BTreeSet::from([
                "top-openapi.yaml".to_string(),
                "apis/nested-openapi.yaml".to_string(),
            ])
        );
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("orders-openapi.yaml"));

        let result = ArtifactScanner::new(vec![
            dir.path().join("does-not-exist"),
            dir.path().to_path_buf(),
        ])
        .scan();
        assert_eq!(result.primaries.len(), 1);
    }

    #[test]
    fn test_multiple_roots_merge() {
        let main = tempdir().unwrap();
        let test = tempdir().unwrap();
        touch(&main.path().join("orders-openapi.yaml"));
        touch(&test.path().join("films.graphql"));

        let result = scan(
            &[main.path().to_path_buf(), test.path().to_path_buf()],
            &SuffixRules::standard(),
        );
        assert_eq!(
            ids(&result.primaries),
            BTreeSet::from(["films.graphql".to_string(), "orders-openapi.yaml".to_string()])
        );
    }

    #[test]
    fn test_stable_id_uses_forward_slashes() {
        let root = Path::new("/project/resources");
        let path = root.join("apis").join("orders-openapi.yaml");
        assert_eq!(
            stable_id_for(root, &path).as_deref(),
            Some("apis/orders-openapi.yaml")
        );
        assert_eq!(stable_id_for(root, Path::new("/elsewhere/x.proto")), None);
    }

    #[test]
    fn test_declared_descriptor_infers_format() {
        let d = ArtifactDescriptor::declared("specs/orders-openapi.yaml", ArtifactRole::Primary);
        assert_eq!(d.format, ArtifactFormat::OpenApi);
        assert_eq!(d.stable_id, "specs/orders-openapi.yaml");

        let d = ArtifactDescriptor::declared("specs/custom.bin", ArtifactRole::Secondary);
        assert_eq!(d.format, ArtifactFormat::Unspecified);
    }

    #[test]
    fn test_declared_under_a_root_gets_root_relative_id() {
        let root = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        touch(&root.path().join("apis/orders-openapi.yaml"));
        touch(&elsewhere.path().join("films-openapi.yaml"));
        let roots = vec![root.path().to_path_buf()];

        let inside = root.path().join("apis/orders-openapi.yaml");
        let d = ArtifactDescriptor::declared_under(
            &inside.display().to_string(),
            ArtifactRole::Primary,
            &roots,
        );
        assert_eq!(d.stable_id, "apis/orders-openapi.yaml");
        assert_eq!(d.locator, ArtifactLocator::Path(inside));

        let outside = elsewhere.path().join("films-openapi.yaml").display().to_string();
        let d = ArtifactDescriptor::declared_under(&outside, ArtifactRole::Primary, &roots);
        assert_eq!(d.stable_id, outside);
    }

    #[test]
    fn test_declared_stable_id_resolves_dotted_paths() {
        let root = tempdir().unwrap();
        touch(&root.path().join("orders-openapi.yaml"));
        let dotted = root.path().join("apis/../orders-openapi.yaml");
        std::fs::create_dir_all(root.path().join("apis")).unwrap();

        assert_eq!(
            declared_stable_id(&dotted, &[root.path().to_path_buf()]).as_deref(),
            Some("orders-openapi.yaml")
        );
    }
}
