//! Error types for the generation job orchestrator.
//!
//! Two layers: `OrchestratorError` is what a batch invocation can return (programmer or
//! configuration errors only), while `JobError` is the classified failure recorded on a
//! single job and never raised.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classified failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    QuotaExceeded,
    ServiceDisabled,
    SafetyFiltered,
    Timeout,
    TransientNetwork,
    Cancelled,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::ServiceDisabled => "service_disabled",
            ErrorKind::SafetyFiltered => "safety_filtered",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        }
    }

    /// Whether this kind is a property of the (model, credential) pair rather than the request.
    pub fn is_target_failure(self) -> bool {
        matches!(self, ErrorKind::QuotaExceeded | ErrorKind::ServiceDisabled)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded on a job (or on its materialization step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "batch cancelled")
    }

    pub fn ladder_exhausted() -> Self {
        Self::new(ErrorKind::Fatal, "fallback ladder exhausted")
    }
}

/// Errors returned by the batch invocation surface.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Fallback ladder has no targets: {0}")]
    EmptyLadder(String),

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Invalid timing configuration: {0}")]
    InvalidTiming(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(err: config::ConfigError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}
