//! Result Materializer
//!
//! Downloads a succeeded job's artifact and hands the bytes to a storage sink. Persistence
//! is tracked apart from generation: a failed download leaves the job `Succeeded` with a
//! failed materialization, so only this step needs retrying.

use crate::classify::ErrorClassifier;
use crate::error::{ErrorKind, JobError, OrchestratorError};
use crate::job::{JobOutcome, Materialization};
use crate::provider::{build_provider_http_client, AuthContext, ProviderAdapter, ProviderError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable location of a materialized artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReference {
    /// Sink-relative path the artifact was stored under.
    pub path: String,
    pub public_url: String,
}

/// External persistence collaborator.
///
/// Implementations must be idempotent: storing the same bytes under the same path again
/// returns the same URL without further side effects.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn store(&self, bytes: &[u8], path: &str) -> Result<String, OrchestratorError>;
}

/// Stores artifacts below a local directory and returns `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalStorageSink {
    root: PathBuf,
}

impl LocalStorageSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a sink-relative path, refusing anything that would escape the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, OrchestratorError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(OrchestratorError::Storage(format!(
                "Invalid storage path '{}': must be relative and stay below the storage root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn file_url(dest: &Path) -> Result<String, OrchestratorError> {
        let absolute = tokio::fs::canonicalize(dest).await.map_err(|e| {
            OrchestratorError::Storage(format!("Failed to resolve {:?}: {}", dest, e))
        })?;
        Ok(format!("file://{}", absolute.display()))
    }
}

#[async_trait]
impl StorageSink for LocalStorageSink {
    async fn store(&self, bytes: &[u8], path: &str) -> Result<String, OrchestratorError> {
        let dest = self.resolve(path)?;

        // Same bytes already stored: nothing to write.
        if let Ok(existing) = tokio::fs::read(&dest).await {
            if blake3::hash(&existing) == blake3::hash(bytes) {
                debug!(path, "Artifact already stored");
                return Self::file_url(&dest).await;
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OrchestratorError::Storage(format!(
                    "Failed to create parent directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        let mut temp_name = dest.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        tokio::fs::write(&temp_path, bytes).await.map_err(|e| {
            OrchestratorError::Storage(format!("Failed to write {:?}: {}", temp_path, e))
        })?;
        if let Err(e) = tokio::fs::rename(&temp_path, &dest).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(OrchestratorError::Storage(format!(
                "Failed to rename temp file to {:?}: {}",
                dest, e
            )));
        }

        debug!(
            path,
            bytes = bytes.len(),
            content_hash = %hex::encode(blake3::hash(bytes).as_bytes()),
            "Artifact stored"
        );
        Self::file_url(&dest).await
    }
}

/// Translate a provider-native result URI into a fetchable HTTPS URL.
///
/// `gs://bucket/object` and `s3://bucket/key` map to the public endpoints of their stores;
/// `http(s)` URLs pass through. Anything else cannot be downloaded.
pub fn resolve_fetch_uri(uri: &str) -> Result<String, JobError> {
    let unsupported = || {
        JobError::new(
            ErrorKind::Fatal,
            format!("unsupported result URI '{}'", uri),
        )
    };

    if uri.starts_with("https://") || uri.starts_with("http://") {
        return Ok(uri.to_string());
    }
    let (scheme, rest) = uri.split_once("://").ok_or_else(unsupported)?;
    let (bucket, object) = rest.split_once('/').ok_or_else(unsupported)?;
    if bucket.is_empty() || object.is_empty() {
        return Err(unsupported());
    }
    match scheme {
        "gs" => Ok(format!(
            "https://storage.googleapis.com/{}/{}",
            bucket, object
        )),
        "s3" => Ok(format!("https://{}.s3.amazonaws.com/{}", bucket, object)),
        _ => Err(unsupported()),
    }
}

/// Plain HTTP artifact fetcher that adapters can delegate `download` to.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_provider_http_client()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn authorized(&self, uri: &str, auth: &AuthContext) -> RequestBuilder {
        let request = self.client.get(uri);
        match auth {
            AuthContext::None => request,
            AuthContext::Bearer { token } => request.bearer_auth(token),
            AuthContext::Header { name, value } => request.header(name.as_str(), value.as_str()),
            AuthContext::QueryParam { name, value } => request.query(&[(name, value)]),
        }
    }

    /// GET the artifact bytes; non-2xx responses become `ProviderError::http`.
    ///
    /// Helper for `ProviderAdapter::download` implementations whose result URIs are plain
    /// HTTP(S) objects. Resolve `gs://` URIs with [`resolve_fetch_uri`] first.
    pub async fn fetch(&self, uri: &str, auth: &AuthContext) -> Result<Vec<u8>, ProviderError> {
        let response = self.authorized(uri, auth).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Blank bodies fall back to the status's canonical reason.
fn status_error(status: StatusCode, body: String) -> ProviderError {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("download failed").to_string()
    } else {
        body
    };
    ProviderError::http(status.as_u16(), message)
}

/// Downloads artifacts through the provider adapter and persists them through a sink.
pub struct ResultMaterializer {
    adapter: Arc<dyn ProviderAdapter>,
    sink: Arc<dyn StorageSink>,
    classifier: Arc<ErrorClassifier>,
}

impl ResultMaterializer {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, sink: Arc<dyn StorageSink>) -> Self {
        Self {
            adapter,
            sink,
            classifier: Arc::new(ErrorClassifier::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Persist one succeeded job's artifact under `path`.
    ///
    /// Never touches submit or poll; calling it again with the same path yields the same URL.
    pub async fn materialize(
        &self,
        outcome: &JobOutcome,
        auth: &AuthContext,
        path: &str,
    ) -> Result<StorageReference, JobError> {
        let artifact = outcome
            .artifact
            .as_ref()
            .filter(|_| outcome.generation_succeeded())
            .ok_or_else(|| {
                JobError::new(
                    ErrorKind::Fatal,
                    format!(
                        "scene {} has no succeeded generation to materialize",
                        outcome.scene_index
                    ),
                )
            })?;

        let fetch_uri = resolve_fetch_uri(&artifact.result_uri)?;
        let bytes = self
            .adapter
            .download(&fetch_uri, auth)
            .await
            .map_err(|e| {
                JobError::new(self.classifier.classify_error(&e), format!("download failed: {}", e))
            })?;
        if bytes.is_empty() {
            return Err(JobError::new(
                ErrorKind::Fatal,
                format!("downloaded artifact from {} is empty", fetch_uri),
            ));
        }

        let public_url = self
            .sink
            .store(&bytes, path)
            .await
            .map_err(|e| JobError::new(ErrorKind::Fatal, format!("storage failed: {}", e)))?;

        info!(
            scene_index = outcome.scene_index,
            path,
            public_url = %public_url,
            "Artifact materialized"
        );
        Ok(StorageReference {
            path: path.to_string(),
            public_url,
        })
    }

    /// Materialize and record the result on the outcome. Outcomes that did not succeed are
    /// left untouched.
    pub async fn apply(&self, outcome: &mut JobOutcome, auth: &AuthContext, path: &str) {
        if !outcome.generation_succeeded() {
            return;
        }
        outcome.materialization = match self.materialize(outcome, auth, path).await {
            Ok(reference) => Materialization::Stored(reference),
            Err(err) => {
                warn!(
                    scene_index = outcome.scene_index,
                    error_kind = %err.kind,
                    error = %err.message,
                    "Materialization failed"
                );
                Materialization::Failed(err)
            }
        };
    }
}
