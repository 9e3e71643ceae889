//! Provider Adapter Abstraction
//!
//! The fixed contract every generative-media backend (video, speech, music, render APIs)
//! implements so the orchestrator can drive it without knowing its wire format. The
//! orchestrator never branches on provider identity; everything provider-specific lives
//! behind `ProviderAdapter`.

use crate::ladder::ProviderTarget;
use crate::request::GenerationRequest;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where a provider error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// The provider answered with an HTTP error status.
    Http,
    /// No HTTP response was received (connect, DNS, reset, ...).
    Network,
    /// The long-running operation itself finished with an error.
    Operation,
}

/// Raw provider failure, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
    pub source: ErrorSource,
}

impl ProviderError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            source: ErrorSource::Http,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            source: ErrorSource::Network,
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            source: ErrorSource::Operation,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => ProviderError::http(status.as_u16(), error.to_string()),
            None if error.is_timeout() => {
                ProviderError::network(format!("Request timeout: {}", error))
            }
            None if error.is_connect() => {
                ProviderError::network(format!("Connection error: {}", error))
            }
            None => ProviderError::network(format!("HTTP error: {}", error)),
        }
    }
}

/// Opaque token for an in-progress provider operation.
///
/// A handle is bound to the target it was submitted under; a fallback retry always
/// produces a new handle rather than reusing an old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub id: String,
    pub target: ProviderTarget,
}

impl OperationHandle {
    pub fn new(id: impl Into<String>, target: ProviderTarget) -> Self {
        Self {
            id: id.into(),
            target,
        }
    }
}

/// Result of one poll call.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Operation not finished yet.
    Pending,
    /// Operation finished and produced an artifact.
    Done {
        result_uri: String,
        /// Provider-reported media duration in seconds, when known.
        duration_secs: Option<f64>,
    },
    /// Operation finished with an error.
    Failed(ProviderError),
}

/// Authentication applied to artifact downloads.
///
/// Passed explicitly because downloads often authenticate differently from submission
/// (signed URL vs API key header).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthContext {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Header {
        name: String,
        value: String,
    },
    QueryParam {
        name: String,
        value: String,
    },
}

/// Per-provider submit/poll/download implementation.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Start a long-running generation under the given target.
    async fn submit(
        &self,
        target: &ProviderTarget,
        request: &GenerationRequest,
    ) -> Result<OperationHandle, ProviderError>;

    /// Check the state of a previously submitted operation.
    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError>;

    /// Fetch the bytes behind a result URI (already translated to a fetchable form).
    async fn download(&self, result_uri: &str, auth: &AuthContext)
        -> Result<Vec<u8>, ProviderError>;

    /// Neutralized variant of a request, used for the single retry after a safety rejection.
    fn simplify(&self, request: &GenerationRequest) -> GenerationRequest {
        request.clone()
    }

    /// Short provider name for logs and events.
    fn provider_name(&self) -> &str;
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Shared HTTP client settings for adapters and downloaders.
pub fn build_provider_http_client() -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .timeout(PROVIDER_HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {}", e)))
}
