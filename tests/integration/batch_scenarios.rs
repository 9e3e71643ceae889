//! Integration tests for end-to-end batch behavior
//!
//! Tests cover:
//! - Shared ladder fallback across jobs
//! - Safety-filter retry without ladder movement
//! - Submission throttling independent of polling
//! - Ladder exhaustion and partial failure
//! - Retry of the failed subset
//! - Input validation at the batch surface

use super::support::*;
use async_trait::async_trait;
use genjob::aggregate::aggregate;
use genjob::classify::ErrorClassifier;
use genjob::error::{ErrorKind, OrchestratorError};
use genjob::events::{BatchEventData, EventSink};
use genjob::job::JobState;
use genjob::ladder::{FallbackLadder, LadderConfig, ProviderTarget};
use genjob::orchestrator::{run_batch, Orchestrator};
use genjob::poller::{BatchContext, BatchSignals};
use genjob::provider::{AuthContext, OperationHandle, PollStatus, ProviderAdapter, ProviderError};
use genjob::request::GenerationRequest;
use genjob::scheduler::{ScheduleOptions, Scheduler, SubmitThrottle};
use genjob::simulate::{AttemptScript, ScriptedAdapter};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_quota_on_second_request_moves_later_requests_to_next_target() {
    let scenes = (0..5)
        .map(|i| {
            if i == 1 {
                scene_with(i, vec![submit_rejected(http_error(429, "RESOURCE_EXHAUSTED"))])
            } else {
                scene(i)
            }
        })
        .collect();
    let scenario = scenario(&["t0", "t1"], timing(1_000, 60_000, 0), scenes);

    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert_eq!(result.success_count, 5);
    assert_eq!(models_for(&submissions, 0), vec!["t0"]);
    assert_eq!(models_for(&submissions, 1), vec!["t0", "t1"]);
    for scene_index in 2..5 {
        assert_eq!(models_for(&submissions, scene_index), vec!["t1"]);
    }
    assert_eq!(
        result.outcomes[1].artifact.as_ref().unwrap().target,
        ProviderTarget::new("t1", "primary")
    );
}

#[tokio::test(start_paused = true)]
async fn test_safety_rejection_retries_with_simplified_request_on_same_target() {
    let rejected = AttemptScript {
        fail: Some(operation_error("The prompt was blocked by our safety filters")),
        ..Default::default()
    };
    let scenario = scenario(
        &["t0", "t1"],
        timing(1_000, 60_000, 0),
        vec![scene_with(0, vec![rejected]), scene(1)],
    );

    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    let first = &result.outcomes[0];
    assert_eq!(first.state, JobState::Succeeded);
    assert_eq!(first.targets_tried, vec![ProviderTarget::new("t0", "primary")]);
    assert_eq!(first.attempts, 2);

    let scene_zero: Vec<_> = submissions.iter().filter(|r| r.scene_index == 0).collect();
    assert_eq!(scene_zero.len(), 2);
    assert!(!scene_zero[0].simplified);
    assert!(scene_zero[1].simplified);
    // The cursor did not move: the next scene still goes to the first target.
    assert_eq!(models_for(&submissions, 1), vec!["t0"]);
}

#[tokio::test(start_paused = true)]
async fn test_submission_gap_is_independent_of_polling() {
    let scenario = scenario(
        &["t0"],
        timing(1_000, 120_000, 2_000),
        vec![scene_with(0, vec![pending_then_done(30)]), scene(1), scene(2)],
    );

    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert_eq!(result.success_count, 3);
    assert_eq!(submissions.len(), 3);
    for pair in submissions.windows(2) {
        assert!(pair[1].at_ms - pair[0].at_ms >= 2_000);
    }
    // Job #1 polls for ~30s; submission #2 did not wait for it.
    assert!(submissions[1].at_ms < 30_000);
    assert!(result.outcomes[0].elapsed_ms >= 30_000);
}

/// Accepts every submission and exhausts the shared ladder right after scene 2 is accepted,
/// as another consumer burning through the remaining quota would.
struct ExhaustingAdapter {
    ladder: Arc<FallbackLadder>,
    submitted: Mutex<Vec<usize>>,
}

#[async_trait]
impl ProviderAdapter for ExhaustingAdapter {
    async fn submit(
        &self,
        target: &ProviderTarget,
        request: &GenerationRequest,
    ) -> Result<OperationHandle, ProviderError> {
        self.submitted.lock().push(request.scene_index);
        if request.scene_index == 2 {
            while self.ladder.advance(ErrorKind::QuotaExceeded) {}
        }
        Ok(OperationHandle::new(
            format!("op-{}", request.scene_index),
            target.clone(),
        ))
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError> {
        Ok(PollStatus::Done {
            result_uri: format!("gs://bucket/{}.mp4", handle.id),
            duration_secs: Some(4.0),
        })
    }

    async fn download(&self, _uri: &str, _auth: &AuthContext) -> Result<Vec<u8>, ProviderError> {
        Ok(b"bytes".to_vec())
    }

    fn provider_name(&self) -> &str {
        "exhausting"
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_ladder_fails_remaining_requests_fatal() {
    let ladder = Arc::new(FallbackLadder::new(&LadderConfig::new(["t0", "t1"], ["primary"])).unwrap());
    let adapter = Arc::new(ExhaustingAdapter {
        ladder: Arc::clone(&ladder),
        submitted: Mutex::new(Vec::new()),
    });
    let timing = timing(1_000, 60_000, 500);
    let ctx = Arc::new(BatchContext {
        adapter: adapter.clone(),
        ladder: Arc::clone(&ladder),
        classifier: Arc::new(ErrorClassifier::new()),
        throttle: Arc::new(SubmitThrottle::new(timing.min_submit_gap())),
        timing: timing.clone(),
        signals: BatchSignals::default(),
        events: EventSink::disabled(),
    });
    let scheduler = Scheduler::new(
        ctx,
        ScheduleOptions {
            max_concurrent_polls: None,
            batch_timeout: timing.batch_timeout(5),
        },
    );
    let requests = (0..5)
        .map(|i| GenerationRequest::new(i, json!({ "prompt": i })))
        .collect();

    let result = aggregate(scheduler.run(requests).await);

    assert_eq!(result.len(), 5);
    assert_eq!(result.success_count, 3);
    assert_eq!(result.failed_count, 2);
    assert_eq!(result.failed_indices(), vec![3, 4]);
    for outcome in &result.outcomes[3..] {
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Fatal));
        assert_eq!(outcome.attempts, 0);
    }
    assert_eq!(*adapter.submitted.lock(), vec![0, 1, 2]);
    assert_eq!(result.total_duration_secs, 12.0);
}

#[tokio::test(start_paused = true)]
async fn test_quota_reported_by_operation_exhausts_single_target_ladder() {
    let failed = AttemptScript {
        fail: Some(operation_error("Quota exceeded for aiplatform.googleapis.com")),
        ..Default::default()
    };
    let scenario = scenario(
        &["only"],
        timing(1_000, 60_000, 5_000),
        vec![scene_with(0, vec![failed]), scene(1), scene(2)],
    );

    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert_eq!(submissions.len(), 1);
    assert_eq!(result.success_count, 0);
    assert_eq!(result.failed_count, 3);
    for outcome in &result.outcomes {
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Fatal));
    }
    assert!(result.outcomes[0]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("quota_exceeded"));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_credential_falls_back_to_next_credential() {
    let mut scenario = scenario(&["veo"], timing(1_000, 60_000, 0), vec![scene(0), scene(1)]);
    scenario.ladder = LadderConfig::new(["veo"], ["project-a", "project-b"]);
    scenario.dead_targets = vec![genjob::simulate::DeadTarget {
        model: "veo".to_string(),
        credential: Some("project-a".to_string()),
        error: http_error(
            403,
            "Vertex AI API has not been used in project 1234 before or it is disabled",
        ),
    }];

    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert_eq!(result.success_count, 2);
    let credentials: Vec<_> = submissions
        .iter()
        .map(|r| r.target.credential_id.as_str())
        .collect();
    assert_eq!(credentials, vec!["project-a", "project-b", "project-b"]);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_submit_error_fails_only_that_scene() {
    let scenario = scenario(
        &["t0", "t1"],
        timing(1_000, 60_000, 0),
        vec![
            scene(0),
            scene_with(1, vec![submit_rejected(http_error(400, "invalid duration"))]),
            scene(2),
        ],
    );

    let (result, submissions) = scenario.run(None, EventSink::disabled()).await.unwrap();

    assert_eq!(result.failed_indices(), vec![1]);
    assert_eq!(result.get(1).unwrap().error_kind(), Some(ErrorKind::Fatal));
    assert_eq!(models_for(&submissions, 1), vec!["t0"]);
    assert_eq!(models_for(&submissions, 2), vec!["t0"]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_failed_subset_and_merge() {
    let first = scenario(
        &["t0"],
        timing(1_000, 60_000, 0),
        vec![
            scene(0),
            scene_with(1, vec![submit_rejected(http_error(400, "bad request"))]),
            scene(2),
        ],
    );
    let (first_result, _) = first.run(None, EventSink::disabled()).await.unwrap();
    let retry_requests = first_result.failed_requests();
    assert_eq!(retry_requests.len(), 1);
    assert_eq!(retry_requests[0].scene_index, 1);

    // The second pass runs against a provider that now accepts the request.
    let second = scenario(&["t0"], timing(1_000, 60_000, 0), vec![scene(1)]);
    let adapter = Arc::new(ScriptedAdapter::new(second.clone()));
    let retry_result = run_batch(adapter.clone(), retry_requests, &second.ladder, &second.timing)
        .await
        .unwrap();

    let merged = first_result.merge_retry(retry_result);
    assert!(merged.all_succeeded());
    assert_eq!(merged.len(), 3);
    assert_eq!(adapter.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_describe_batch_progress() {
    let scenario = scenario(
        &["t0", "t1"],
        timing(1_000, 60_000, 0),
        vec![scene_with(0, vec![submit_rejected(http_error(429, "quota"))]), scene(1)],
    );
    let (sink, mut rx) = EventSink::channel();

    let (result, _) = scenario.run(None, sink).await.unwrap();
    assert!(result.all_succeeded());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first().unwrap().data,
        BatchEventData::BatchStarted { total: 2, ladder_len: 2 }
    ));
    assert!(matches!(
        events.last().unwrap().data,
        BatchEventData::BatchCompleted { success_count: 2, failed_count: 0, .. }
    ));
    assert!(events.iter().any(|e| matches!(
        &e.data,
        BatchEventData::LadderAdvanced { reason: ErrorKind::QuotaExceeded, to: Some(to), .. }
            if to.model_id == "t1"
    )));
    let succeeded = events
        .iter()
        .filter(|e| matches!(e.data, BatchEventData::JobSucceeded { .. }))
        .count();
    assert_eq!(succeeded, 2);
    for pair in events.windows(2) {
        assert!(pair[1].seq > pair[0].seq);
    }
}

#[tokio::test]
async fn test_batch_surface_rejects_programmer_errors() {
    let adapter = Arc::new(ScriptedAdapter::new(scenario(&["t0"], timing(10, 100, 0), Vec::new())));
    let ladder = LadderConfig::new(["t0"], ["primary"]);
    let timing = timing(10, 100, 0);

    let duplicate = vec![
        GenerationRequest::new(1, json!({})),
        GenerationRequest::new(1, json!({})),
    ];
    let err = run_batch(adapter.clone(), duplicate, &ladder, &timing)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

    let err = run_batch(
        adapter.clone(),
        vec![GenerationRequest::new(0, json!({}))],
        &LadderConfig::new(["t0"], Vec::<String>::new()),
        &timing,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::EmptyLadder(_)));

    let err = Orchestrator::new(adapter.clone(), ladder.clone(), genjob::config::TimingConfig {
        poll_interval_ms: 0,
        ..timing.clone()
    })
    .run_batch(vec![GenerationRequest::new(0, json!({}))])
    .await
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTiming(_)));

    let empty = run_batch(adapter.clone(), Vec::new(), &ladder, &timing)
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert!(adapter.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_results_follow_scene_order_not_completion_order() {
    // Earlier scenes take longer, so they complete last.
    let scenes = (0..4)
        .map(|i| scene_with(i, vec![pending_then_done(8 - 2 * i as u32)]))
        .collect();
    let scenario = scenario(&["t0"], timing(1_000, 60_000, 100), scenes);

    let (result, _) = scenario.run(None, EventSink::disabled()).await.unwrap();

    let order: Vec<usize> = result.outcomes.iter().map(|o| o.scene_index).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert!(result.outcomes[0].elapsed_ms > result.outcomes[3].elapsed_ms);
    assert_eq!(result.total_duration_secs, 32.0);
}
