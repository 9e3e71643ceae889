//! Batch invocation surface.
//!
//! `run_batch` returns only after every job is terminal. It errors only for programmer or
//! configuration mistakes (malformed requests, zero ladder targets, unusable timing); every
//! per-job failure is reported inside the `BatchResult`.

use crate::aggregate::{aggregate, BatchResult};
use crate::classify::ErrorClassifier;
use crate::config::{GenjobConfig, TimingConfig};
use crate::error::{JobError, OrchestratorError};
use crate::events::{BatchEventData, EventSink};
use crate::job::{JobOutcome, Materialization};
use crate::ladder::{FallbackLadder, LadderConfig};
use crate::materialize::ResultMaterializer;
use crate::poller::{BatchContext, BatchSignals};
use crate::provider::{AuthContext, ProviderAdapter};
use crate::request::{prepare_batch, GenerationRequest};
use crate::scheduler::{ScheduleOptions, Scheduler, SubmitThrottle};
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Maps a succeeded outcome to its sink-relative storage path.
pub type ArtifactPathFn = Arc<dyn Fn(&JobOutcome) -> String + Send + Sync>;

/// `scene-0003.mp4`, keeping the extension of the provider's result URI when it has one.
pub fn default_artifact_path(outcome: &JobOutcome) -> String {
    let extension = outcome
        .artifact
        .as_ref()
        .and_then(|artifact| {
            let without_query = artifact.result_uri.split(['?', '#']).next()?;
            let file_name = without_query.rsplit('/').next()?;
            Path::new(file_name)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| format!(".{}", ext))
        })
        .unwrap_or_default();
    format!("scene-{:04}{}", outcome.scene_index, extension)
}

struct MaterializePlan {
    materializer: ResultMaterializer,
    auth: AuthContext,
    path_for: ArtifactPathFn,
}

/// Runs batches of generation requests against one provider adapter.
pub struct Orchestrator {
    adapter: Arc<dyn ProviderAdapter>,
    ladder: LadderConfig,
    timing: TimingConfig,
    classifier: Arc<ErrorClassifier>,
    events: EventSink,
    cancel: CancellationToken,
    materialize: Option<MaterializePlan>,
}

impl Orchestrator {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, ladder: LadderConfig, timing: TimingConfig) -> Self {
        Self {
            adapter,
            ladder,
            timing,
            classifier: Arc::new(ErrorClassifier::new()),
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
            materialize: None,
        }
    }

    pub fn from_config(adapter: Arc<dyn ProviderAdapter>, config: &GenjobConfig) -> Self {
        Self::new(adapter, config.ladder.clone(), config.timing.clone())
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Use a caller-owned cancellation token; cancelling it ends in-flight jobs as `Cancelled`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persist every succeeded artifact after generation, using `path_for` to name it.
    pub fn with_materializer(
        mut self,
        materializer: ResultMaterializer,
        auth: AuthContext,
        path_for: ArtifactPathFn,
    ) -> Self {
        self.materialize = Some(MaterializePlan {
            materializer: materializer.with_classifier(Arc::clone(&self.classifier)),
            auth,
            path_for,
        });
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub async fn run_batch(
        &self,
        requests: Vec<GenerationRequest>,
    ) -> Result<BatchResult, OrchestratorError> {
        self.timing
            .validate()
            .map_err(OrchestratorError::InvalidTiming)?;
        let ladder = Arc::new(FallbackLadder::new(&self.ladder)?);
        let requests = prepare_batch(requests)?;
        if requests.is_empty() {
            return Ok(BatchResult::empty());
        }

        let started = Instant::now();
        let total = requests.len();
        info!(
            total,
            provider = self.adapter.provider_name(),
            ladder_len = ladder.len(),
            "Starting generation batch"
        );
        self.events.emit_best_effort(BatchEventData::BatchStarted {
            total,
            ladder_len: ladder.len(),
        });

        let ctx = Arc::new(BatchContext {
            adapter: Arc::clone(&self.adapter),
            ladder: Arc::clone(&ladder),
            classifier: Arc::clone(&self.classifier),
            throttle: Arc::new(SubmitThrottle::new(self.timing.min_submit_gap())),
            timing: self.timing.clone(),
            signals: BatchSignals::new(self.cancel.clone()),
            events: self.events.clone(),
        });
        let options = ScheduleOptions {
            max_concurrent_polls: self.timing.max_concurrent_polls(),
            batch_timeout: self.timing.batch_timeout(total),
        };
        let deadline = started + options.batch_timeout;
        let mut outcomes = Scheduler::new(ctx, options).run(requests).await;

        if let Some(plan) = &self.materialize {
            self.materialize_all(plan, deadline, &mut outcomes).await;
        }

        let result = aggregate(outcomes);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            total,
            success_count = result.success_count,
            failed_count = result.failed_count,
            materialization_failed_count = result.materialization_failed_count,
            ladder_cursor = ladder.cursor(),
            elapsed_ms,
            "Generation batch completed"
        );
        self.events.emit_best_effort(BatchEventData::BatchCompleted {
            success_count: result.success_count,
            failed_count: result.failed_count,
            elapsed_ms,
        });
        Ok(result)
    }

    /// Downloads and stores succeeded artifacts. Cancellation and the batch deadline still
    /// apply here; an interrupted download leaves the outcome `Materialization::Failed`.
    async fn materialize_all(
        &self,
        plan: &MaterializePlan,
        deadline: Instant,
        outcomes: &mut [JobOutcome],
    ) {
        let pending = outcomes
            .iter_mut()
            .filter(|outcome| outcome.generation_succeeded())
            .map(|outcome| {
                let path = (plan.path_for)(&*outcome);
                async move {
                    let interrupted = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Some(JobError::cancelled()),
                        _ = sleep_until(deadline) => Some(JobError::timeout("batch timeout elapsed")),
                        _ = plan.materializer.apply(&mut *outcome, &plan.auth, &path) => None,
                    };
                    if let Some(err) = interrupted {
                        warn!(
                            scene_index = outcome.scene_index,
                            error_kind = %err.kind,
                            "Materialization interrupted"
                        );
                        outcome.materialization = Materialization::Failed(err);
                    }
                    outcome
                }
            });

        for outcome in join_all(pending).await {
            let scene_index = outcome.scene_index;
            match &outcome.materialization {
                Materialization::Stored(reference) => {
                    self.events.emit_best_effort(BatchEventData::JobMaterialized {
                        scene_index,
                        public_url: reference.public_url.clone(),
                    })
                }
                Materialization::Failed(err) => {
                    self.events
                        .emit_best_effort(BatchEventData::MaterializationFailed {
                            scene_index,
                            kind: err.kind,
                            message: err.message.clone(),
                        })
                }
                Materialization::Skipped => {}
            }
        }
    }
}

/// One-shot batch run with default classification and no materialization.
pub async fn run_batch(
    adapter: Arc<dyn ProviderAdapter>,
    requests: Vec<GenerationRequest>,
    ladder: &LadderConfig,
    timing: &TimingConfig,
) -> Result<BatchResult, OrchestratorError> {
    Orchestrator::new(adapter, ladder.clone(), timing.clone())
        .run_batch(requests)
        .await
}
