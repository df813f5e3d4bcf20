//! Import RPC against a running mock service.
//!
//! The service exposes two calls: upload a local artifact, and ask the
//! service to download one from a URL. Each takes a "main artifact" flag
//! which is how the service tells primaries from secondaries.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::ImportError;

/// Outcome of one import call.
pub type ImportResult = std::result::Result<(), ImportError>;

const UPLOAD_PATH: &str = "/api/artifact/upload";
const DOWNLOAD_PATH: &str = "/api/artifact/download";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The four import operations the pipeline and reconciler rely on.
///
/// `endpoint` is the service's HTTP base URL as published in exposed
/// configuration (`mockbox.<name>.http`).
#[async_trait]
pub trait ArtifactImporter: Send + Sync {
    async fn import_primary(&self, endpoint: &str, path: &Path) -> ImportResult;

    async fn import_secondary(&self, endpoint: &str, path: &Path) -> ImportResult;

    async fn download_remote_primary(&self, endpoint: &str, url: &str) -> ImportResult;

    async fn download_remote_secondary(&self, endpoint: &str, url: &str) -> ImportResult;
}

/// [`ArtifactImporter`] over the service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpImporter {
    client: reqwest::Client,
}

impl HttpImporter {
    pub fn new() -> Result<Self, ImportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ImportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImportError::Transport {
                endpoint: String::new(),
                message: e.to_string(),
            })?;
        Ok(HttpImporter { client })
    }

    async fn upload(&self, endpoint: &str, path: &Path, main_artifact: bool) -> ImportResult {
        let artifact = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ImportError::Unreadable {
                path: artifact.clone(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| artifact.clone());

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let url = format!("{}{}", endpoint.trim_end_matches('/'), UPLOAD_PATH);
        debug!("Uploading {} to {} (main={})", artifact, url, main_artifact);

        let response = self
            .client
            .post(&url)
            .query(&[("mainArtifact", main_artifact.to_string())])
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport(endpoint, e))?;
        check_status(&artifact, response).await
    }

    async fn download(&self, endpoint: &str, remote_url: &str, main_artifact: bool) -> ImportResult {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), DOWNLOAD_PATH);
        debug!("Asking {} to download {} (main={})", url, remote_url, main_artifact);

        let main = main_artifact.to_string();
        let response = self
            .client
            .post(&url)
            .form(&[("url", remote_url), ("mainArtifact", main.as_str())])
            .send()
            .await
            .map_err(|e| transport(endpoint, e))?;
        check_status(remote_url, response).await
    }
}

fn transport(endpoint: &str, e: reqwest::Error) -> ImportError {
    let message = if e.is_connect() {
        format!("cannot connect: {e}")
    } else if e.is_timeout() {
        format!("timed out: {e}")
    } else {
        e.to_string()
    };
    ImportError::Transport {
        endpoint: endpoint.to_string(),
        message,
    }
}

async fn check_status(artifact: &str, response: reqwest::Response) -> ImportResult {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(ImportError::Rejected {
        artifact: artifact.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ArtifactImporter for HttpImporter {
    async fn import_primary(&self, endpoint: &str, path: &Path) -> ImportResult {
        self.upload(endpoint, path, true).await
    }

    async fn import_secondary(&self, endpoint: &str, path: &Path) -> ImportResult {
        self.upload(endpoint, path, false).await
    }

    async fn download_remote_primary(&self, endpoint: &str, url: &str) -> ImportResult {
        self.download(endpoint, url, true).await
    }

    async fn download_remote_secondary(&self, endpoint: &str, url: &str) -> ImportResult {
        self.download(endpoint, url, false).await
    }
}
