//! Batch Aggregator
//!
//! Reduces terminal job outcomes to a `BatchResult` in scene order. Completion order under
//! concurrency is arbitrary, so ordering is always re-derived from `scene_index`.

use crate::job::JobOutcome;
use crate::request::GenerationRequest;
use serde::{Deserialize, Serialize};

/// Final report for one batch. Partial failure is an ordinary result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// One outcome per request, sorted by `scene_index`.
    pub outcomes: Vec<JobOutcome>,
    pub success_count: usize,
    pub failed_count: usize,
    /// Jobs whose generation succeeded but whose artifact could not be persisted.
    pub materialization_failed_count: usize,
    /// Sum of artifact durations over successful jobs, in seconds.
    pub total_duration_secs: f64,
}

pub fn aggregate(mut outcomes: Vec<JobOutcome>) -> BatchResult {
    outcomes.sort_by_key(|outcome| outcome.scene_index);

    let mut success_count = 0;
    let mut materialization_failed_count = 0;
    let mut total_duration_secs = 0.0;
    for outcome in &outcomes {
        if outcome.is_success() {
            success_count += 1;
            total_duration_secs += outcome
                .artifact
                .as_ref()
                .map(|artifact| artifact.duration_secs)
                .unwrap_or(0.0);
        } else if outcome.generation_succeeded() {
            materialization_failed_count += 1;
        }
    }

    BatchResult {
        failed_count: outcomes.len() - success_count,
        success_count,
        materialization_failed_count,
        total_duration_secs,
        outcomes,
    }
}

impl BatchResult {
    pub fn empty() -> Self {
        aggregate(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count == 0
    }

    pub fn get(&self, scene_index: usize) -> Option<&JobOutcome> {
        self.outcomes
            .binary_search_by_key(&scene_index, |outcome| outcome.scene_index)
            .ok()
            .map(|pos| &self.outcomes[pos])
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Scene indices that did not fully succeed, in order.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed().map(|outcome| outcome.scene_index).collect()
    }

    /// Original requests of every failed job, ready to be run again as a new batch.
    pub fn failed_requests(&self) -> Vec<GenerationRequest> {
        self.failed().map(|outcome| outcome.request.clone()).collect()
    }

    /// Replace the outcome for one scene (e.g. after retrying only its materialization).
    /// Unknown scenes are appended.
    pub fn replace(&mut self, outcome: JobOutcome) {
        let mut outcomes = std::mem::take(&mut self.outcomes);
        match outcomes
            .binary_search_by_key(&outcome.scene_index, |existing| existing.scene_index)
        {
            Ok(pos) => outcomes[pos] = outcome,
            Err(pos) => outcomes.insert(pos, outcome),
        }
        *self = aggregate(outcomes);
    }

    /// Fold the result of a retry-the-failed-subset pass back into this result.
    pub fn merge_retry(mut self, retry: BatchResult) -> BatchResult {
        for outcome in retry.outcomes {
            self.replace(outcome);
        }
        self
    }
}
