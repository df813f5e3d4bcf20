//! Artifact classification by file-name suffix.
//!
//! Primary artifacts define an API contract; secondary artifacts augment one
//! that is already loaded. Classification is a case-sensitive suffix match
//! against an ordered rule table, run once per role.

use serde::{Deserialize, Serialize};

/// Suffixes that mark a Postman-style request collection.
pub const COLLECTION_SUFFIXES: [&str; 2] = ["postman-collection.json", "postman_collection.json"];

/// Role an artifact plays when imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Primary,
    Secondary,
}

impl std::fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactRole::Primary => write!(f, "primary"),
            ArtifactRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Format tag of a recognised artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    OpenApi,
    Protobuf,
    GraphQl,
    AsyncApi,
    SoapUiProject,
    PostmanCollection,
    Metadata,
    Examples,
    HttpArchive,
    /// Declared in configuration or fetched remotely; format left to the service
    Unspecified,
}

impl ArtifactFormat {
    /// Whether the format is a request collection (drives the collection companion)
    pub fn is_collection(&self) -> bool {
        matches!(self, ArtifactFormat::PostmanCollection)
    }
}

/// One suffix → (role, format) rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixRule {
    pub suffix: String,
    pub role: ArtifactRole,
    pub format: ArtifactFormat,
}

impl SuffixRule {
    pub fn new(suffix: &str, role: ArtifactRole, format: ArtifactFormat) -> Self {
        SuffixRule {
            suffix: suffix.to_string(),
            role,
            format,
        }
    }
}

/// Ordered rule table covering both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixRules {
    rules: Vec<SuffixRule>,
}

impl Default for SuffixRules {
    fn default() -> Self {
        Self::standard()
    }
}

impl SuffixRules {
    /// The rule table for the artifact kinds the mock service understands.
    pub fn standard() -> Self {
        use ArtifactFormat::*;
        use ArtifactRole::*;

        let rules = vec![
            SuffixRule::new("-openapi.yml", Primary, OpenApi),
            SuffixRule::new("-openapi.yaml", Primary, OpenApi),
            SuffixRule::new("-openapi.json", Primary, OpenApi),
            SuffixRule::new(".proto", Primary, Protobuf),
            SuffixRule::new(".graphql", Primary, GraphQl),
            SuffixRule::new("-asyncapi.yml", Primary, AsyncApi),
            SuffixRule::new("-asyncapi.yaml", Primary, AsyncApi),
            SuffixRule::new("-asyncapi.json", Primary, AsyncApi),
            SuffixRule::new("-soapui-project.xml", Primary, SoapUiProject),
            SuffixRule::new(COLLECTION_SUFFIXES[0], Secondary, PostmanCollection),
            SuffixRule::new(COLLECTION_SUFFIXES[1], Secondary, PostmanCollection),
            SuffixRule::new("-metadata.yml", Secondary, Metadata),
            SuffixRule::new("-metadata.yaml", Secondary, Metadata),
            SuffixRule::new("-examples.yml", Secondary, Examples),
            SuffixRule::new("-examples.yaml", Secondary, Examples),
            SuffixRule::new(".har", Secondary, HttpArchive),
        ];
        SuffixRules { rules }
    }

    /// Build from an explicit list.
    pub fn from_rules(rules: Vec<SuffixRule>) -> Self {
        SuffixRules { rules }
    }

    /// Rules for one role, in table order.
    pub fn for_role(&self, role: ArtifactRole) -> Vec<SuffixRule> {
        self.rules.iter().filter(|r| r.role == role).cloned().collect()
    }

    pub fn all(&self) -> &[SuffixRule] {
        &self.rules
    }
}

/// Classify a file name against `rules`; first matching suffix wins.
pub fn classify(file_name: &str, rules: &[SuffixRule]) -> Option<(ArtifactRole, ArtifactFormat)> {
    rules
        .iter()
        .find(|rule| file_name.ends_with(rule.suffix.as_str()))
        .map(|rule| (rule.role, rule.format))
}

/// Whether a file name looks like a request collection, whatever its role.
pub fn is_collection(file_name: &str) -> bool {
    COLLECTION_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
}
