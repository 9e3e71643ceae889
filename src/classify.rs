//! Error Classifier
//!
//! Maps a raw provider failure (HTTP status + message) to an `ErrorKind`. This is the single
//! place provider error vocabulary is registered; the poller and the fallback ladder only
//! ever see the resulting kind.
//!
//! Rules, first match wins:
//! 1. HTTP 429 or a quota marker -> `QuotaExceeded`
//! 2. HTTP 403 or a service-disabled marker -> `ServiceDisabled`
//! 3. a safety marker -> `SafetyFiltered`
//! 4. a registered status override
//! 5. no HTTP response at all -> `TransientNetwork`
//! 6. anything else -> `Fatal`
//!
//! Marker matching is a case-insensitive substring check. It is a heuristic: provider
//! wording changes, so markers are registrable at runtime rather than hard-coded.

use crate::error::ErrorKind;
use crate::provider::{ErrorSource, ProviderError};
use std::collections::HashMap;

const DEFAULT_QUOTA_MARKERS: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "resource_exhausted",
    "resource exhausted",
    "too many requests",
    "insufficient credits",
];

const DEFAULT_DISABLED_MARKERS: &[&str] = &[
    "has not been used in project",
    "service not enabled",
    "not been enabled",
    "it is disabled",
    "service_disabled",
    "api not enabled",
];

const DEFAULT_SAFETY_MARKERS: &[&str] = &[
    "safety",
    "content filter",
    "content_filter",
    "responsible ai",
    "moderation",
    "prohibited content",
    "policy violation",
    "raimediafiltered",
];

/// Pluggable provider-error classifier.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    quota_markers: Vec<String>,
    disabled_markers: Vec<String>,
    safety_markers: Vec<String>,
    status_overrides: HashMap<u16, ErrorKind>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let owned = |markers: &[&str]| markers.iter().map(|m| m.to_string()).collect();
        Self {
            quota_markers: owned(DEFAULT_QUOTA_MARKERS),
            disabled_markers: owned(DEFAULT_DISABLED_MARKERS),
            safety_markers: owned(DEFAULT_SAFETY_MARKERS),
            status_overrides: HashMap::new(),
        }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extra message marker for one of the marker-driven kinds.
    ///
    /// Only `QuotaExceeded`, `ServiceDisabled` and `SafetyFiltered` are marker-driven;
    /// other kinds are ignored and `false` is returned.
    pub fn register_marker(&mut self, kind: ErrorKind, marker: impl Into<String>) -> bool {
        let marker = marker.into().to_lowercase();
        let list = match kind {
            ErrorKind::QuotaExceeded => &mut self.quota_markers,
            ErrorKind::ServiceDisabled => &mut self.disabled_markers,
            ErrorKind::SafetyFiltered => &mut self.safety_markers,
            _ => return false,
        };
        if !list.contains(&marker) {
            list.push(marker);
        }
        true
    }

    pub fn with_marker(mut self, kind: ErrorKind, marker: impl Into<String>) -> Self {
        self.register_marker(kind, marker);
        self
    }

    /// Map an HTTP status not covered by the built-in rules to a kind (e.g. 503 -> TransientNetwork).
    pub fn with_status(mut self, status: u16, kind: ErrorKind) -> Self {
        self.status_overrides.insert(status, kind);
        self
    }

    /// Classify from the raw parts. A missing status means no HTTP response was received.
    pub fn classify(&self, status: Option<u16>, message: &str) -> ErrorKind {
        self.classify_parts(status, message, status.is_none())
    }

    /// Classify a structured provider error, honouring where it originated.
    pub fn classify_error(&self, error: &ProviderError) -> ErrorKind {
        self.classify_parts(
            error.status,
            &error.message,
            error.source == ErrorSource::Network,
        )
    }

    fn classify_parts(&self, status: Option<u16>, message: &str, no_response: bool) -> ErrorKind {
        let message = message.to_lowercase();
        let has_marker = |markers: &[String]| markers.iter().any(|m| message.contains(m.as_str()));

        if status == Some(429) || has_marker(&self.quota_markers) {
            return ErrorKind::QuotaExceeded;
        }
        if status == Some(403) || has_marker(&self.disabled_markers) {
            return ErrorKind::ServiceDisabled;
        }
        if has_marker(&self.safety_markers) {
            return ErrorKind::SafetyFiltered;
        }
        if let Some(kind) = status.and_then(|s| self.status_overrides.get(&s)) {
            return *kind;
        }
        if no_response {
            return ErrorKind::TransientNetwork;
        }
        ErrorKind::Fatal
    }
}
