//! Poller: drives one job from `Pending` to a terminal state.
//!
//! The transition table lives in `LadderAction::for_kind`; this module only applies it.
//! Every provider call and every sleep goes through `JobDriver::suspend`, which bounds it
//! by the job's wall-clock deadline and aborts it on batch cancellation or batch timeout,
//! so a job always terminates within `max_wait + poll_interval`.

use crate::classify::ErrorClassifier;
use crate::config::TimingConfig;
use crate::error::{ErrorKind, JobError};
use crate::events::{BatchEventData, EventSink};
use crate::job::{ArtifactRef, Job, JobOutcome, JobState};
use crate::ladder::{FallbackLadder, LadderAction, ProviderTarget};
use crate::provider::{PollStatus, ProviderAdapter, ProviderError};
use crate::request::GenerationRequest;
use crate::scheduler::SubmitThrottle;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Batch-level interruption signals.
#[derive(Debug, Clone, Default)]
pub struct BatchSignals {
    /// Caller-requested cancellation; interrupted jobs end `Failed(Cancelled)`.
    pub cancel: CancellationToken,
    /// Fired when the batch ceiling elapses; interrupted jobs end `Failed(Timeout)`.
    pub deadline: CancellationToken,
}

impl BatchSignals {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: CancellationToken::new(),
        }
    }

    /// Interruption already signalled, if any. Cancellation wins over the batch deadline.
    pub fn interruption(&self) -> Option<JobError> {
        if self.cancel.is_cancelled() {
            Some(JobError::cancelled())
        } else if self.deadline.is_cancelled() {
            Some(JobError::timeout("batch timeout elapsed"))
        } else {
            None
        }
    }
}

/// Collaborators shared by every job of one batch.
pub struct BatchContext {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub ladder: Arc<FallbackLadder>,
    pub classifier: Arc<ErrorClassifier>,
    pub throttle: Arc<SubmitThrottle>,
    pub timing: TimingConfig,
    pub signals: BatchSignals,
    pub events: EventSink,
}

/// Per-job state machine.
pub struct JobDriver {
    job: Job,
    ctx: Arc<BatchContext>,
    /// Request actually sent; replaced by the simplified variant after a safety rejection.
    active_request: GenerationRequest,
    deadline: Instant,
}

impl JobDriver {
    pub fn new(request: GenerationRequest, ctx: Arc<BatchContext>) -> Self {
        let deadline = Instant::now() + ctx.timing.max_wait();
        Self {
            active_request: request.clone(),
            job: Job::new(request),
            ctx,
            deadline,
        }
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    /// Drive the job through submission and polling.
    pub async fn run(mut self) -> JobOutcome {
        if self.submit_phase().await {
            self.poll_phase().await
        } else {
            self.finish()
        }
    }

    /// `Pending -> Submitted`, including submit-time fallback and retries.
    ///
    /// Returns `true` once an operation handle is held; `false` if the job failed.
    pub async fn submit_phase(&mut self) -> bool {
        loop {
            if let Some(err) = self.ctx.signals.interruption() {
                self.job.fail(err);
                return false;
            }
            if self.ctx.ladder.is_exhausted() {
                self.job.fail(JobError::ladder_exhausted());
                return false;
            }

            let throttle = Arc::clone(&self.ctx.throttle);
            if let Err(err) = self.suspend(throttle.acquire()).await {
                self.job.fail(err);
                return false;
            }
            // Read after the throttle wait; other jobs may have moved the cursor meanwhile.
            let Some(target) = self.ctx.ladder.current() else {
                self.job.fail(JobError::ladder_exhausted());
                return false;
            };

            self.job.attempts += 1;
            debug!(
                scene_index = self.job.scene_index(),
                model_id = %target.model_id,
                credential_id = %target.credential_id,
                attempt = self.job.attempts,
                "Submitting generation request"
            );

            let adapter = Arc::clone(&self.ctx.adapter);
            let request = self.active_request.clone();
            let submitted = match self.suspend(adapter.submit(&target, &request)).await {
                Ok(result) => result,
                Err(err) => {
                    self.job.fail(err);
                    return false;
                }
            };

            match submitted {
                Ok(handle) => {
                    info!(
                        scene_index = self.job.scene_index(),
                        model_id = %target.model_id,
                        credential_id = %target.credential_id,
                        attempt = self.job.attempts,
                        operation_id = %handle.id,
                        "Generation submitted"
                    );
                    self.ctx.events.emit_best_effort(BatchEventData::JobSubmitted {
                        scene_index: self.job.scene_index(),
                        target: target.clone(),
                        attempt: self.job.attempts,
                        operation_id: handle.id.clone(),
                    });
                    self.job.mark_submitted(handle);
                    return true;
                }
                Err(provider_err) => {
                    if let Err(err) = self.recover(&target, &provider_err).await {
                        self.job.fail(err);
                        return false;
                    }
                }
            }
        }
    }

    /// `Submitted -> Polling -> {Succeeded | Failed}`, resubmitting when the operation
    /// fails in a recoverable way.
    pub async fn poll_phase(mut self) -> JobOutcome {
        if self.job.state() != JobState::Submitted {
            return self.finish();
        }
        self.job.mark_polling();
        let mut poll_failures = 0u32;

        loop {
            if let Err(err) = self.suspend(tokio::time::sleep(self.ctx.timing.poll_interval())).await
            {
                self.job.fail(err);
                break;
            }
            let Some(handle) = self.job.operation_handle.clone() else {
                self.job
                    .fail(JobError::new(ErrorKind::Fatal, "polling without an operation handle"));
                break;
            };

            let adapter = Arc::clone(&self.ctx.adapter);
            let polled = match self.suspend(adapter.poll(&handle)).await {
                Ok(result) => result,
                Err(err) => {
                    self.job.fail(err);
                    break;
                }
            };

            match polled {
                Ok(PollStatus::Pending) => {
                    poll_failures = 0;
                }
                Ok(PollStatus::Done {
                    result_uri,
                    duration_secs,
                }) => {
                    self.job.succeed(ArtifactRef {
                        result_uri,
                        target: handle.target.clone(),
                        duration_secs: duration_secs.unwrap_or(self.job.request.duration_hint),
                    });
                    break;
                }
                Ok(PollStatus::Failed(provider_err)) => {
                    if let Err(err) = self.recover(&handle.target, &provider_err).await {
                        self.job.fail(err);
                        break;
                    }
                    self.job.mark_resubmit();
                    if !self.submit_phase().await {
                        break;
                    }
                    self.job.mark_polling();
                    poll_failures = 0;
                }
                Err(provider_err) => {
                    // The poll call itself failed; the operation may still be running.
                    let kind = self.ctx.classifier.classify_error(&provider_err);
                    let retryable = matches!(
                        kind,
                        ErrorKind::TransientNetwork | ErrorKind::Timeout | ErrorKind::QuotaExceeded
                    );
                    poll_failures += 1;
                    if !retryable || poll_failures > self.ctx.timing.max_transient_retries {
                        self.job.fail(JobError::new(kind, provider_err.to_string()));
                        break;
                    }
                    warn!(
                        scene_index = self.job.scene_index(),
                        error_kind = %kind,
                        poll_failures,
                        error = %provider_err,
                        "Poll call failed, retrying on next interval"
                    );
                }
            }
        }

        self.finish()
    }

    /// Apply the transition table to a classified failure.
    ///
    /// `Ok(())` means "submit again" (possibly on a new target or with a simplified request).
    async fn recover(
        &mut self,
        target: &ProviderTarget,
        provider_err: &ProviderError,
    ) -> Result<(), JobError> {
        let kind = self.ctx.classifier.classify_error(provider_err);
        let scene_index = self.job.scene_index();
        let timing = &self.ctx.timing;

        match LadderAction::for_kind(kind) {
            LadderAction::Advance => {
                let next = self.ctx.ladder.advance_past(target, kind);
                warn!(
                    scene_index,
                    model_id = %target.model_id,
                    credential_id = %target.credential_id,
                    error_kind = %kind,
                    next_target = ?next.as_ref().map(ToString::to_string),
                    error = %provider_err,
                    "Provider target failed, falling back"
                );
                self.ctx.events.emit_best_effort(BatchEventData::LadderAdvanced {
                    scene_index,
                    from: target.clone(),
                    to: next.clone(),
                    reason: kind,
                });
                if next.is_none() {
                    return Err(JobError::new(
                        ErrorKind::Fatal,
                        format!("fallback ladder exhausted after {}: {}", kind, provider_err),
                    ));
                }
            }
            LadderAction::RetrySimplified => {
                if self.job.safety_retries >= timing.max_safety_retries {
                    return Err(JobError::new(kind, provider_err.to_string()));
                }
                self.job.safety_retries += 1;
                self.active_request = self.ctx.adapter.simplify(&self.job.request);
                info!(
                    scene_index,
                    model_id = %target.model_id,
                    "Safety filter rejected request, retrying with simplified request"
                );
            }
            LadderAction::RetrySame => {
                if self.job.transient_retries >= timing.max_transient_retries {
                    return Err(JobError::new(kind, provider_err.to_string()));
                }
                self.job.transient_retries += 1;
                warn!(
                    scene_index,
                    model_id = %target.model_id,
                    error_kind = %kind,
                    retry = self.job.transient_retries,
                    error = %provider_err,
                    "Transient provider failure, retrying same target"
                );
                self.suspend(tokio::time::sleep(timing.poll_interval()))
                    .await?;
            }
            LadderAction::Fail => return Err(JobError::new(kind, provider_err.to_string())),
        }

        self.ctx.events.emit_best_effort(BatchEventData::JobRetrying {
            scene_index,
            kind,
            target: target.clone(),
            attempt: self.job.attempts,
        });
        Ok(())
    }

    /// Await `fut` unless the job deadline, the batch deadline or cancellation comes first.
    async fn suspend<F: Future>(&self, fut: F) -> Result<F::Output, JobError> {
        let signals = &self.ctx.signals;
        tokio::select! {
            biased;
            _ = signals.cancel.cancelled() => Err(JobError::cancelled()),
            _ = signals.deadline.cancelled() => Err(JobError::timeout("batch timeout elapsed")),
            res = tokio::time::timeout_at(self.deadline, fut) => res.map_err(|_| {
                JobError::timeout(format!(
                    "no terminal state within {}ms",
                    self.ctx.timing.max_wait_ms
                ))
            }),
        }
    }

    /// Log the terminal state and reduce the job to its outcome snapshot.
    pub fn finish(self) -> JobOutcome {
        let scene_index = self.job.scene_index();
        let elapsed_ms = self.job.elapsed().as_millis() as u64;
        match (&self.job.result, &self.job.error) {
            (Some(artifact), _) => {
                info!(
                    scene_index,
                    model_id = %artifact.target.model_id,
                    attempt = self.job.attempts,
                    elapsed_ms,
                    "Generation succeeded"
                );
                self.ctx.events.emit_best_effort(BatchEventData::JobSucceeded {
                    scene_index,
                    result_uri: artifact.result_uri.clone(),
                    elapsed_ms,
                });
            }
            (None, Some(err)) => {
                warn!(
                    scene_index,
                    error_kind = %err.kind,
                    attempt = self.job.attempts,
                    elapsed_ms,
                    error = %err.message,
                    "Generation failed"
                );
                self.ctx.events.emit_best_effort(BatchEventData::JobFailed {
                    scene_index,
                    kind: err.kind,
                    message: err.message.clone(),
                });
            }
            (None, None) => {}
        }
        self.job.into_outcome()
    }
}
