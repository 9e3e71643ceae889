//! Job state model.
//!
//! A `Job` is owned by exactly one driver while active and is reduced to an immutable
//! `JobOutcome` snapshot once terminal.

use crate::error::{ErrorKind, JobError};
use crate::ladder::ProviderTarget;
use crate::materialize::StorageReference;
use crate::provider::OperationHandle;
use crate::request::GenerationRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Submitted,
    Polling,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Allowed transitions. `Polling -> Pending` is the fallback/safety resubmission path;
    /// the next `Submitted` always carries a new operation handle.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Submitted, Polling)
                | (Submitted, Failed)
                | (Polling, Succeeded)
                | (Polling, Failed)
                | (Polling, Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Pending => "pending",
            JobState::Submitted => "submitted",
            JobState::Polling => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Provider-side result of a succeeded generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub result_uri: String,
    pub target: ProviderTarget,
    pub duration_secs: f64,
}

/// Persistence state, tracked separately from generation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Materialization {
    #[default]
    Skipped,
    Stored(StorageReference),
    Failed(JobError),
}

/// Live job, owned by its driver.
#[derive(Debug)]
pub struct Job {
    pub request: GenerationRequest,
    state: JobState,
    pub operation_handle: Option<OperationHandle>,
    /// Submit attempts across every target tried.
    pub attempts: u32,
    pub transient_retries: u32,
    pub safety_retries: u32,
    pub targets_tried: Vec<ProviderTarget>,
    pub result: Option<ArtifactRef>,
    pub error: Option<JobError>,
    started_at: Instant,
}

impl Job {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            state: JobState::Pending,
            operation_handle: None,
            attempts: 0,
            transient_retries: 0,
            safety_retries: 0,
            targets_tried: Vec::new(),
            result: None,
            error: None,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn scene_index(&self) -> usize {
        self.request.scene_index
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                scene_index = self.request.scene_index,
                from = %self.state,
                to = %next,
                "Ignoring invalid job state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn mark_submitted(&mut self, handle: OperationHandle) {
        if self.transition(JobState::Submitted) {
            if self.targets_tried.last() != Some(&handle.target) {
                self.targets_tried.push(handle.target.clone());
            }
            self.operation_handle = Some(handle);
        }
    }

    pub fn mark_polling(&mut self) {
        self.transition(JobState::Polling);
    }

    /// Drop the current operation and wait for resubmission.
    pub fn mark_resubmit(&mut self) {
        if self.transition(JobState::Pending) {
            self.operation_handle = None;
        }
    }

    pub fn succeed(&mut self, artifact: ArtifactRef) {
        if self.transition(JobState::Succeeded) {
            self.result = Some(artifact);
        }
    }

    pub fn fail(&mut self, error: JobError) {
        if self.state.is_terminal() {
            return;
        }
        // Failure is reachable from every non-terminal state.
        self.state = JobState::Failed;
        self.operation_handle = None;
        self.error = Some(error);
    }

    pub fn into_outcome(self) -> JobOutcome {
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        JobOutcome {
            scene_index: self.request.scene_index,
            request: self.request,
            state: self.state,
            artifact: self.result,
            error: self.error,
            attempts: self.attempts,
            targets_tried: self.targets_tried,
            elapsed_ms,
            materialization: Materialization::Skipped,
        }
    }
}

/// Terminal snapshot of a job, as held by the batch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub scene_index: usize,
    pub request: GenerationRequest,
    pub state: JobState,
    pub artifact: Option<ArtifactRef>,
    pub error: Option<JobError>,
    pub attempts: u32,
    pub targets_tried: Vec<ProviderTarget>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub materialization: Materialization,
}

impl JobOutcome {
    /// Outcome for a request that never reached a driver (cancelled or timed out while queued,
    /// or rejected because the ladder was exhausted).
    pub fn failed_unstarted(request: GenerationRequest, error: JobError) -> Self {
        let mut job = Job::new(request);
        job.fail(error);
        job.into_outcome()
    }

    pub fn generation_succeeded(&self) -> bool {
        self.state == JobState::Succeeded
    }

    /// Generation succeeded and persistence (if attempted) did not fail.
    pub fn is_success(&self) -> bool {
        self.generation_succeeded() && !matches!(self.materialization, Materialization::Failed(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match (&self.error, &self.materialization) {
            (Some(err), _) => Some(err.kind),
            (None, Materialization::Failed(err)) => Some(err.kind),
            _ => None,
        }
    }

    pub fn storage(&self) -> Option<&StorageReference> {
        match &self.materialization {
            Materialization::Stored(reference) => Some(reference),
            _ => None,
        }
    }
}
