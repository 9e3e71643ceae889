//! Fallback Ladder
//!
//! Ordered (model, credential) targets built as a cross product in which models vary
//! fastest: every model is tried under credential 0 before credential 1 is used. One cursor
//! is shared by every job of a batch, so a target proven dead for one job is skipped by all
//! later jobs. Only target-level failures (quota, disabled service) move the cursor; request
//! level failures (safety, timeouts, network blips) never do.

use crate::error::{ErrorKind, OrchestratorError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One (model, credential) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderTarget {
    pub model_id: String,
    pub credential_id: String,
}

impl ProviderTarget {
    pub fn new(model_id: impl Into<String>, credential_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            credential_id: credential_id.into(),
        }
    }
}

impl fmt::Display for ProviderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.model_id, self.credential_id)
    }
}

/// Configured models and credentials, in preference order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderConfig {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub credentials: Vec<String>,
}

impl LadderConfig {
    pub fn new<M, C>(models: M, credentials: C) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            credentials: credentials.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.models.is_empty() {
            return Err("at least one model is required".to_string());
        }
        if self.credentials.is_empty() {
            return Err("at least one credential is required".to_string());
        }
        for (label, ids) in [("model", &self.models), ("credential", &self.credentials)] {
            let mut seen = HashSet::new();
            for id in ids {
                if id.trim().is_empty() {
                    return Err(format!("{} id cannot be blank", label));
                }
                if !seen.insert(id.as_str()) {
                    return Err(format!("duplicate {} id '{}'", label, id));
                }
            }
        }
        Ok(())
    }
}

/// What the poller should do after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderAction {
    /// Move the shared cursor past the failing target and resubmit there.
    Advance,
    /// Resubmit once on the same target with a simplified request.
    RetrySimplified,
    /// Resubmit on the same target, bounded by the transient retry budget.
    RetrySame,
    /// Give up.
    Fail,
}

impl LadderAction {
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::QuotaExceeded | ErrorKind::ServiceDisabled => LadderAction::Advance,
            ErrorKind::SafetyFiltered => LadderAction::RetrySimplified,
            ErrorKind::Timeout | ErrorKind::TransientNetwork => LadderAction::RetrySame,
            ErrorKind::Cancelled | ErrorKind::Fatal => LadderAction::Fail,
        }
    }
}

/// Cursor coordinates within the cross product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderPosition {
    pub model_idx: usize,
    pub credential_idx: usize,
}

/// Shared fallback ladder for one batch.
#[derive(Debug)]
pub struct FallbackLadder {
    targets: Vec<ProviderTarget>,
    model_count: usize,
    cursor: Mutex<usize>,
}

impl FallbackLadder {
    pub fn new(config: &LadderConfig) -> Result<Self, OrchestratorError> {
        config.validate().map_err(OrchestratorError::EmptyLadder)?;

        let targets = config
            .credentials
            .iter()
            .flat_map(|credential| {
                config
                    .models
                    .iter()
                    .map(move |model| ProviderTarget::new(model.clone(), credential.clone()))
            })
            .collect();

        Ok(Self {
            targets,
            model_count: config.models.len(),
            cursor: Mutex::new(0),
        })
    }

    /// Target the next submission should use, or `None` once the ladder is exhausted.
    pub fn current(&self) -> Option<ProviderTarget> {
        let cursor = self.cursor.lock();
        self.targets.get(*cursor).cloned()
    }

    /// Advance for the given reason. Returns `false` if the ladder is (now) exhausted.
    ///
    /// Reasons that are not target-level failures leave the cursor untouched.
    pub fn advance(&self, reason: ErrorKind) -> bool {
        let mut cursor = self.cursor.lock();
        if LadderAction::for_kind(reason) == LadderAction::Advance && *cursor < self.targets.len()
        {
            *cursor += 1;
        }
        *cursor < self.targets.len()
    }

    /// Advance only if the cursor still points at `failed`.
    ///
    /// Two jobs that discover the same dead target concurrently move the cursor once; the
    /// second caller simply receives the target the first one moved to.
    pub fn advance_past(&self, failed: &ProviderTarget, reason: ErrorKind) -> Option<ProviderTarget> {
        let mut cursor = self.cursor.lock();
        if LadderAction::for_kind(reason) == LadderAction::Advance
            && self.targets.get(*cursor) == Some(failed)
        {
            *cursor += 1;
        }
        self.targets.get(*cursor).cloned()
    }

    pub fn is_exhausted(&self) -> bool {
        *self.cursor.lock() >= self.targets.len()
    }

    pub fn position(&self) -> Option<LadderPosition> {
        let cursor = *self.cursor.lock();
        (cursor < self.targets.len()).then(|| LadderPosition {
            model_idx: cursor % self.model_count,
            credential_idx: cursor / self.model_count,
        })
    }

    /// Raw cursor index; equals `len()` once exhausted.
    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    pub fn targets(&self) -> &[ProviderTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
