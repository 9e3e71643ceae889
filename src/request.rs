//! Generation requests: the immutable input of a batch.

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One unit of requested generation.
///
/// `scene_index` only orders results; it never reaches provider semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub scene_index: usize,
    /// Provider-specific payload, opaque to the orchestrator.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Expected media duration in seconds.
    #[serde(default)]
    pub duration_hint: f64,
    /// Whether this request extends a prior result (e.g. "extend" mode for long-form music).
    #[serde(default)]
    pub continuation: bool,
}

impl GenerationRequest {
    pub fn new(scene_index: usize, payload: serde_json::Value) -> Self {
        Self {
            scene_index,
            payload,
            duration_hint: 0.0,
            continuation: false,
        }
    }

    pub fn with_duration_hint(mut self, seconds: f64) -> Self {
        self.duration_hint = seconds;
        self
    }

    pub fn with_continuation(mut self, continuation: bool) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if !self.duration_hint.is_finite() || self.duration_hint < 0.0 {
            return Err(OrchestratorError::InvalidRequest(format!(
                "scene {} has invalid duration hint {}",
                self.scene_index, self.duration_hint
            )));
        }
        Ok(())
    }
}

/// Validate a whole batch and return it sorted by `scene_index`.
pub fn prepare_batch(
    mut requests: Vec<GenerationRequest>,
) -> Result<Vec<GenerationRequest>, OrchestratorError> {
    let mut seen = HashSet::with_capacity(requests.len());
    for request in &requests {
        request.validate()?;
        if !seen.insert(request.scene_index) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "duplicate scene_index {}",
                request.scene_index
            )));
        }
    }
    requests.sort_by_key(|r| r.scene_index);
    Ok(requests)
}
