//! Throttled Scheduler
//!
//! Submits a batch in scene order, at most one submission per `min_submit_gap`, and lets
//! every submitted job poll concurrently. Resubmissions made by the poller after a fallback
//! or safety retry go through the same throttle, so the gap holds for every submit call of
//! the batch.

use crate::error::{ErrorKind, JobError};
use crate::job::JobOutcome;
use crate::poller::{BatchContext, JobDriver};
use crate::request::GenerationRequest;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info};

/// Enforces a minimum gap between consecutive submissions.
///
/// Waiters are served in arrival order (tokio's mutex is fair).
#[derive(Debug)]
pub struct SubmitThrottle {
    min_gap: Duration,
    last_submit: Mutex<Option<Instant>>,
}

impl SubmitThrottle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_submit: Mutex::new(None),
        }
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Wait until a submission slot is free and claim it.
    ///
    /// Dropping the future before it resolves leaves the previous slot untouched.
    pub async fn acquire(&self) {
        let mut last = self.last_submit.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_gap;
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Knobs for one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Maximum jobs holding an operation at once; `None` is unbounded.
    pub max_concurrent_polls: Option<usize>,
    /// Whole-batch ceiling.
    pub batch_timeout: Duration,
}

pub struct Scheduler {
    ctx: Arc<BatchContext>,
    options: ScheduleOptions,
}

impl Scheduler {
    pub fn new(ctx: Arc<BatchContext>, options: ScheduleOptions) -> Self {
        Self { ctx, options }
    }

    /// Run every request to a terminal outcome.
    ///
    /// `requests` must already be in scene order. Returns exactly one outcome per request,
    /// sorted by `scene_index`.
    pub async fn run(&self, requests: Vec<GenerationRequest>) -> Vec<JobOutcome> {
        let total = requests.len();
        let poll_slots = self
            .options
            .max_concurrent_polls
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let batch_deadline = self.ctx.signals.deadline.clone();
        let batch_timeout = self.options.batch_timeout;
        let watchdog = tokio::spawn(async move {
            sleep(batch_timeout).await;
            batch_deadline.cancel();
        });

        let mut outcomes = Vec::with_capacity(total);
        let mut polling = FuturesUnordered::new();

        for request in requests {
            let permit = match self.poll_slot(poll_slots.as_ref()).await {
                Ok(permit) => permit,
                Err(err) => {
                    debug!(
                        scene_index = request.scene_index,
                        error_kind = %err.kind,
                        "Request interrupted before submission"
                    );
                    outcomes.push(JobOutcome::failed_unstarted(request, err));
                    continue;
                }
            };

            let fallback_request = request.clone();
            let mut driver = JobDriver::new(request, Arc::clone(&self.ctx));
            if !driver.submit_phase().await {
                outcomes.push(driver.finish());
                continue;
            }

            let handle = tokio::spawn(async move {
                let outcome = driver.poll_phase().await;
                drop(permit);
                outcome
            });
            polling.push(async move {
                handle.await.unwrap_or_else(|e| {
                    error!(
                        scene_index = fallback_request.scene_index,
                        error = %e,
                        "Poll task aborted"
                    );
                    JobOutcome::failed_unstarted(
                        fallback_request,
                        JobError::new(ErrorKind::Fatal, format!("poll task aborted: {}", e)),
                    )
                })
            });
        }

        while let Some(outcome) = polling.next().await {
            outcomes.push(outcome);
        }
        watchdog.abort();

        outcomes.sort_by_key(|outcome| outcome.scene_index);
        info!(total, "Scheduler drained batch");
        outcomes
    }

    /// Claim a polling slot, or report why the request can no longer start.
    async fn poll_slot(
        &self,
        slots: Option<&Arc<Semaphore>>,
    ) -> Result<Option<OwnedSemaphorePermit>, JobError> {
        let signals = &self.ctx.signals;
        if let Some(err) = signals.interruption() {
            return Err(err);
        }
        let Some(slots) = slots else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = signals.cancel.cancelled() => Err(JobError::cancelled()),
            _ = signals.deadline.cancelled() => Err(JobError::timeout("batch timeout elapsed")),
            permit = Arc::clone(slots).acquire_owned() => permit
                .map(Some)
                .map_err(|_| JobError::new(ErrorKind::Fatal, "poll slots closed")),
        }
    }
}
