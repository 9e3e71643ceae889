//! Integration tests for ceilings and interruption
//!
//! Tests cover:
//! - Per-job wall-clock ceiling across polling
//! - Batch-level timeout
//! - Caller cancellation of in-flight and queued jobs
//! - Bounded concurrent polling
//! - Interrupting artifact downloads

use super::support::*;
use async_trait::async_trait;
use genjob::error::ErrorKind;
use genjob::events::EventSink;
use genjob::job::{JobState, Materialization};
use genjob::ladder::ProviderTarget;
use genjob::materialize::{LocalStorageSink, ResultMaterializer};
use genjob::orchestrator::{default_artifact_path, Orchestrator};
use genjob::provider::{AuthContext, OperationHandle, PollStatus, ProviderAdapter, ProviderError};
use genjob::request::GenerationRequest;
use genjob::simulate::{AttemptScript, Scenario, ScriptedAdapter};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Generates normally but never finishes downloading the artifact.
struct StalledDownload(ScriptedAdapter);

#[async_trait]
impl ProviderAdapter for StalledDownload {
    async fn submit(
        &self,
        target: &ProviderTarget,
        request: &GenerationRequest,
    ) -> Result<OperationHandle, ProviderError> {
        self.0.submit(target, request).await
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError> {
        self.0.poll(handle).await
    }

    async fn download(
        &self,
        _result_uri: &str,
        _auth: &AuthContext,
    ) -> Result<Vec<u8>, ProviderError> {
        std::future::pending().await
    }

    fn provider_name(&self) -> &str {
        "stalled-download"
    }
}

fn stalled_orchestrator(scenario: &Scenario, storage: &TempDir) -> Orchestrator {
    let adapter: Arc<dyn ProviderAdapter> =
        Arc::new(StalledDownload(ScriptedAdapter::new(scenario.clone())));
    let materializer = ResultMaterializer::new(
        Arc::clone(&adapter),
        Arc::new(LocalStorageSink::new(storage.path())),
    );
    Orchestrator::new(adapter, scenario.ladder.clone(), scenario.timing.clone()).with_materializer(
        materializer,
        AuthContext::None,
        Arc::new(default_artifact_path),
    )
}

#[tokio::test(start_paused = true)]
async fn test_never_done_job_times_out_within_ceiling() {
    let timing = timing(1_500, 10_000, 0);
    let ceiling = timing.max_wait() + timing.poll_interval();
    let scenario = scenario(&["t0"], timing, vec![scene_with(0, vec![hang()]), scene(1)]);

    let started = Instant::now();
    let (result, _) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert!(started.elapsed() <= ceiling);
    let stuck = result.get(0).unwrap();
    assert_eq!(stuck.state, JobState::Failed);
    assert_eq!(stuck.error_kind(), Some(ErrorKind::Timeout));
    assert!(stuck.elapsed_ms <= ceiling.as_millis() as u64);
    // A stuck job does not hold back the others.
    assert_eq!(result.get(1).unwrap().state, JobState::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_spans_fallback_retries() {
    // Each attempt burns time before failing with a transient error.
    let slow_failure = || AttemptScript {
        pending_polls: 3,
        fail: Some(network_error("connection reset by peer")),
        ..Default::default()
    };
    let timing = timing(1_000, 6_000, 0);
    let scenario = scenario(
        &["t0"],
        timing.clone(),
        vec![scene_with(0, (0..10).map(|_| slow_failure()).collect())],
    );

    let started = Instant::now();
    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert!(started.elapsed() <= timing.max_wait() + timing.poll_interval());
    assert_eq!(result.get(0).unwrap().error_kind(), Some(ErrorKind::Timeout));
    assert!(submissions.len() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_timeout_marks_unfinished_jobs_timeout() {
    let mut timing = timing(1_000, 600_000, 1_000);
    timing.batch_timeout_ms = 5_000;
    let scenes = (0..3).map(|i| scene_with(i, vec![hang()])).collect();
    let scenario = scenario(&["t0"], timing, scenes);

    let started = Instant::now();
    let (result, _) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert!(started.elapsed() <= Duration::from_millis(5_100));
    assert_eq!(result.failed_count, 3);
    for outcome in &result.outcomes {
        let error = outcome.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.message, "batch timeout elapsed");
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_in_flight_and_queued_jobs() {
    let scenes = (0..3).map(|i| scene_with(i, vec![hang()])).collect();
    let scenario = scenario(&["t0"], timing(1_000, 600_000, 5_000), scenes);
    let adapter = Arc::new(ScriptedAdapter::new(scenario.clone()));
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        adapter.clone() as Arc<dyn ProviderAdapter>,
        scenario.ladder.clone(),
        scenario.timing.clone(),
    )
    .with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = orchestrator.run_batch(scenario.requests()).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(2_600));
    assert_eq!(result.len(), 3);
    for outcome in &result.outcomes {
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    }
    // Scene 0 was submitted; scene 1 was waiting for its submit slot; scene 2 never started.
    assert_eq!(adapter.submissions().len(), 1);
    assert_eq!(result.get(1).unwrap().attempts, 0);
    assert_eq!(result.get(2).unwrap().attempts, 0);
    assert_eq!(adapter.poll_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_makes_no_provider_calls() {
    let scenario = scenario(&["t0"], timing(1_000, 60_000, 0), vec![scene(0), scene(1)]);
    let adapter = Arc::new(ScriptedAdapter::new(scenario.clone()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = Orchestrator::new(adapter.clone(), scenario.ladder.clone(), scenario.timing.clone())
        .with_cancellation(cancel)
        .run_batch(scenario.requests())
        .await
        .unwrap();

    assert_eq!(result.failed_count, 2);
    assert!(adapter.submissions().is_empty());
    assert_eq!(adapter.poll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_polls_are_bounded() {
    let mut timing = timing(1_000, 60_000, 0);
    timing.max_concurrent_polls = 1;
    let scenes = (0..3)
        .map(|i| scene_with(i, vec![pending_then_done(2)]))
        .collect();
    let scenario = scenario(&["t0"], timing, scenes);

    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert!(result.all_succeeded());
    // Each job polls three times (two pending, one done) before releasing its slot.
    assert!(submissions[1].at_ms >= submissions[0].at_ms + 3_000);
    assert!(submissions[2].at_ms >= submissions[1].at_ms + 3_000);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_stalled_download() {
    let storage = TempDir::new().unwrap();
    let scenario = scenario(&["t0"], timing(1_000, 60_000, 0), vec![scene(0), scene(1)]);
    let cancel = CancellationToken::new();
    let orchestrator = stalled_orchestrator(&scenario, &storage).with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(3_600),
        orchestrator.run_batch(scenario.requests()),
    )
    .await
    .expect("run_batch should return once cancelled")
    .unwrap();

    assert!(started.elapsed() <= Duration::from_millis(5_100));
    assert_eq!(result.success_count, 0);
    assert_eq!(result.materialization_failed_count, 2);
    for outcome in &result.outcomes {
        // Generation finished before the cancel; only the download was cut short.
        assert_eq!(outcome.state, JobState::Succeeded);
        assert!(outcome.error.is_none());
        match &outcome.materialization {
            Materialization::Failed(err) => assert_eq!(err.kind, ErrorKind::Cancelled),
            other => panic!("expected failed materialization, got {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_timeout_interrupts_stalled_download() {
    let storage = TempDir::new().unwrap();
    let mut timing = timing(1_000, 60_000, 0);
    timing.batch_timeout_ms = 5_000;
    let scenario = scenario(&["t0"], timing, vec![scene(0)]);

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(3_600),
        stalled_orchestrator(&scenario, &storage).run_batch(scenario.requests()),
    )
    .await
    .expect("run_batch should return at the batch timeout")
    .unwrap();

    assert!(started.elapsed() <= Duration::from_millis(5_100));
    let outcome = result.get(0).unwrap();
    assert_eq!(outcome.state, JobState::Succeeded);
    match &outcome.materialization {
        Materialization::Failed(err) => {
            assert_eq!(err.kind, ErrorKind::Timeout);
            assert_eq!(err.message, "batch timeout elapsed");
        }
        other => panic!("expected failed materialization, got {:?}", other),
    }
    assert_eq!(result.failed_count, 1);
}
