//! Integration tests for artifact materialization
//!
//! Tests cover:
//! - Storing succeeded artifacts through the orchestrator
//! - Idempotent re-materialization
//! - Persistence failures kept apart from generation results

use super::support::*;
use async_trait::async_trait;
use genjob::error::{ErrorKind, OrchestratorError};
use genjob::job::{JobState, Materialization};
use genjob::materialize::{LocalStorageSink, ResultMaterializer, StorageSink};
use genjob::orchestrator::{default_artifact_path, Orchestrator};
use genjob::provider::{AuthContext, ProviderAdapter};
use genjob::simulate::ScriptedAdapter;
use std::sync::Arc;
use tempfile::TempDir;

struct BrokenSink;

#[async_trait]
impl StorageSink for BrokenSink {
    async fn store(&self, _bytes: &[u8], _path: &str) -> Result<String, OrchestratorError> {
        Err(OrchestratorError::Storage("bucket unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_succeeded_artifacts_are_stored() {
    let temp_dir = TempDir::new().unwrap();
    let scenario = scenario(&["t0"], timing(10, 5_000, 0), vec![scene(0), scene(1)]);

    let (result, _) = scenario
        .run(Some(temp_dir.path()), genjob::events::EventSink::disabled())
        .await
        .unwrap();

    assert!(result.all_succeeded());
    for outcome in &result.outcomes {
        let reference = outcome.storage().expect("artifact should be stored");
        assert!(reference.public_url.starts_with("file://"));
        assert_eq!(reference.path, default_artifact_path(outcome));
        assert!(temp_dir.path().join(&reference.path).exists());
    }
    assert!(temp_dir.path().join("scene-0000.mp4").exists());
    assert!(temp_dir.path().join("scene-0001.mp4").exists());
}

#[tokio::test]
async fn test_materialize_again_returns_same_url_without_resubmitting() {
    let temp_dir = TempDir::new().unwrap();
    let scenario = scenario(&["t0"], timing(10, 5_000, 0), vec![scene(0)]);
    let adapter = Arc::new(ScriptedAdapter::new(scenario.clone()));
    let materializer = ResultMaterializer::new(
        Arc::clone(&adapter) as Arc<dyn ProviderAdapter>,
        Arc::new(LocalStorageSink::new(temp_dir.path())),
    );

    let result = Orchestrator::new(adapter.clone(), scenario.ladder.clone(), scenario.timing.clone())
        .run_batch(scenario.requests())
        .await
        .unwrap();
    let outcome = result.get(0).unwrap();
    assert_eq!(outcome.materialization, Materialization::Skipped);

    let first = materializer
        .materialize(outcome, &AuthContext::None, "renders/scene-0.mp4")
        .await
        .unwrap();
    let second = materializer
        .materialize(outcome, &AuthContext::None, "renders/scene-0.mp4")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(adapter.submissions().len(), 1);
    assert_eq!(adapter.download_calls(), 2);
}

#[tokio::test]
async fn test_storage_failure_counts_as_failed_and_can_be_retried_alone() {
    let temp_dir = TempDir::new().unwrap();
    let scenario = scenario(&["t0"], timing(10, 5_000, 0), vec![scene(0), scene(1)]);
    let adapter = Arc::new(ScriptedAdapter::new(scenario.clone()));

    let broken = ResultMaterializer::new(
        Arc::clone(&adapter) as Arc<dyn ProviderAdapter>,
        Arc::new(BrokenSink),
    );
    let mut result = Orchestrator::new(adapter.clone(), scenario.ladder.clone(), scenario.timing.clone())
        .with_materializer(broken, AuthContext::None, Arc::new(default_artifact_path))
        .run_batch(scenario.requests())
        .await
        .unwrap();

    assert_eq!(result.success_count, 0);
    assert_eq!(result.failed_count, 2);
    assert_eq!(result.materialization_failed_count, 2);
    for outcome in &result.outcomes {
        // Generation itself is not rolled back.
        assert_eq!(outcome.state, JobState::Succeeded);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Fatal));
    }
    let submissions_after_generation = adapter.submissions().len();

    let working = ResultMaterializer::new(
        Arc::clone(&adapter) as Arc<dyn ProviderAdapter>,
        Arc::new(LocalStorageSink::new(temp_dir.path())),
    );
    let mut retried: Vec<_> = result.failed().cloned().collect();
    for outcome in &mut retried {
        let path = default_artifact_path(outcome);
        working.apply(outcome, &AuthContext::None, &path).await;
    }
    for outcome in retried {
        result.replace(outcome);
    }

    assert!(result.all_succeeded());
    assert_eq!(result.materialization_failed_count, 0);
    assert_eq!(result.total_duration_secs, 16.0);
    assert_eq!(adapter.submissions().len(), submissions_after_generation);
}

#[tokio::test]
async fn test_failed_generation_is_not_materialized() {
    let temp_dir = TempDir::new().unwrap();
    let scenario = scenario(
        &["t0"],
        timing(10, 5_000, 0),
        vec![
            scene(0),
            scene_with(1, vec![submit_rejected(http_error(400, "invalid request"))]),
        ],
    );

    let (result, _) = scenario
        .run(Some(temp_dir.path()), genjob::events::EventSink::disabled())
        .await
        .unwrap();

    assert_eq!(result.success_count, 1);
    let failed = result.get(1).unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.materialization, Materialization::Skipped);
    assert!(!temp_dir.path().join("scene-0001.mp4").exists());
}
