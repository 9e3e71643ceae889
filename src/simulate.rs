//! Dry-run simulation.
//!
//! A `Scenario` (TOML) scripts how a provider behaves for each scene: which submit calls
//! fail, how long operations stay pending, and how they finish. `ScriptedAdapter` replays
//! the script behind the real `ProviderAdapter` contract, so a batch can be exercised end to
//! end through the orchestrator without any network.

use crate::aggregate::BatchResult;
use crate::config::TimingConfig;
use crate::error::OrchestratorError;
use crate::events::EventSink;
use crate::ladder::{LadderConfig, ProviderTarget};
use crate::materialize::{LocalStorageSink, ResultMaterializer};
use crate::orchestrator::{default_artifact_path, Orchestrator};
use crate::provider::{AuthContext, OperationHandle, PollStatus, ProviderAdapter, ProviderError};
use crate::request::GenerationRequest;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Scripted provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedError {
    /// HTTP status; absent for operation-level or network failures.
    #[serde(default)]
    pub status: Option<u16>,
    pub message: String,
    /// No HTTP response at all.
    #[serde(default)]
    pub network: bool,
}

impl ScriptedError {
    fn to_provider_error(&self) -> ProviderError {
        match (self.status, self.network) {
            (Some(status), _) => ProviderError::http(status, self.message.clone()),
            (None, true) => ProviderError::network(self.message.clone()),
            (None, false) => ProviderError::operation(self.message.clone()),
        }
    }
}

/// Behavior of one submit call for a scene and the operation it starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptScript {
    /// Reject the submit call itself.
    #[serde(default)]
    pub submit_error: Option<ScriptedError>,
    /// Poll calls answered with "still running" before the operation finishes.
    #[serde(default)]
    pub pending_polls: u32,
    /// Finish the operation with this error instead of a result.
    #[serde(default)]
    pub fail: Option<ScriptedError>,
    /// Never finish.
    #[serde(default)]
    pub hang: bool,
    #[serde(default)]
    pub result_uri: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneScript {
    pub scene_index: usize,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub duration_hint: f64,
    #[serde(default)]
    pub continuation: bool,
    /// One entry per submit call, in order. Calls beyond the list succeed immediately.
    #[serde(default)]
    pub attempts: Vec<AttemptScript>,
}

/// A target that rejects every submission, e.g. a credential whose quota is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadTarget {
    pub model: String,
    /// Every credential when absent.
    #[serde(default)]
    pub credential: Option<String>,
    pub error: ScriptedError,
}

impl DeadTarget {
    fn matches(&self, target: &ProviderTarget) -> bool {
        self.model == target.model_id
            && self
                .credential
                .as_ref()
                .map_or(true, |credential| *credential == target.credential_id)
    }
}

/// Simulated call latencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyConfig {
    #[serde(default)]
    pub submit_ms: u64,
    #[serde(default)]
    pub poll_ms: u64,
    #[serde(default)]
    pub download_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub dead_targets: Vec<DeadTarget>,
    #[serde(default)]
    pub scenes: Vec<SceneScript>,
}

impl Scenario {
    pub fn from_toml(source: &str) -> Result<Self, OrchestratorError> {
        toml::from_str(source)
            .map_err(|e| OrchestratorError::Config(format!("Invalid scenario: {}", e)))
    }

    pub fn from_path(path: &Path) -> Result<Self, OrchestratorError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("Failed to read scenario {:?}: {}", path, e))
        })?;
        Self::from_toml(&source)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.scenes
            .iter()
            .map(|scene| {
                GenerationRequest::new(scene.scene_index, scene.payload.clone())
                    .with_duration_hint(scene.duration_hint)
                    .with_continuation(scene.continuation)
            })
            .collect()
    }

    /// Run the scenario through the orchestrator. With a storage root, succeeded artifacts
    /// are also materialized into it.
    pub async fn run(
        &self,
        storage_root: Option<&Path>,
        events: EventSink,
    ) -> Result<(BatchResult, Vec<SubmitRecord>), OrchestratorError> {
        let adapter = Arc::new(ScriptedAdapter::new(self.clone()));
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&adapter) as Arc<dyn ProviderAdapter>,
            self.ladder.clone(),
            self.timing.clone(),
        )
        .with_events(events);
        if let Some(root) = storage_root {
            let materializer = ResultMaterializer::new(
                Arc::clone(&adapter) as Arc<dyn ProviderAdapter>,
                Arc::new(LocalStorageSink::new(root)),
            );
            orchestrator = orchestrator.with_materializer(
                materializer,
                AuthContext::None,
                Arc::new(default_artifact_path),
            );
        }
        let result = orchestrator.run_batch(self.requests()).await?;
        Ok((result, adapter.submissions()))
    }
}

/// One submit call observed by the scripted adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRecord {
    pub scene_index: usize,
    pub target: ProviderTarget,
    /// Milliseconds since the adapter was created.
    pub at_ms: u64,
    pub simplified: bool,
    pub accepted: bool,
}

#[derive(Debug)]
struct RunningOperation {
    remaining_pending: u32,
    script: AttemptScript,
    scene_index: usize,
    attempt: usize,
}

#[derive(Debug, Default)]
struct ScriptState {
    submits_per_scene: HashMap<usize, usize>,
    operations: HashMap<String, RunningOperation>,
    submissions: Vec<SubmitRecord>,
    poll_calls: usize,
    download_calls: usize,
}

/// `ProviderAdapter` that replays a `Scenario`.
#[derive(Debug)]
pub struct ScriptedAdapter {
    scenario: Scenario,
    state: Mutex<ScriptState>,
    created_at: Instant,
}

impl ScriptedAdapter {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            state: Mutex::new(ScriptState::default()),
            created_at: Instant::now(),
        }
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.lock().submissions.clone()
    }

    pub fn poll_calls(&self) -> usize {
        self.state.lock().poll_calls
    }

    pub fn download_calls(&self) -> usize {
        self.state.lock().download_calls
    }

    fn attempt_script(&self, scene_index: usize, attempt: usize) -> AttemptScript {
        self.scenario
            .scenes
            .iter()
            .find(|scene| scene.scene_index == scene_index)
            .and_then(|scene| scene.attempts.get(attempt).cloned())
            .unwrap_or_default()
    }

    async fn delay(ms: u64) {
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn submit(
        &self,
        target: &ProviderTarget,
        request: &GenerationRequest,
    ) -> Result<OperationHandle, ProviderError> {
        let at_ms = self.created_at.elapsed().as_millis() as u64;
        let scene_index = request.scene_index;
        let simplified = request.payload.get("simplified") == Some(&Value::Bool(true));

        let dead = self
            .scenario
            .dead_targets
            .iter()
            .find(|dead| dead.matches(target))
            .map(|dead| dead.error.to_provider_error());

        let result = {
            let mut state = self.state.lock();
            let attempt = {
                let counter = state.submits_per_scene.entry(scene_index).or_insert(0);
                let attempt = *counter;
                *counter += 1;
                attempt
            };
            let script = self.attempt_script(scene_index, attempt);
            let rejected = dead.or_else(|| script.submit_error.as_ref().map(|e| e.to_provider_error()));

            state.submissions.push(SubmitRecord {
                scene_index,
                target: target.clone(),
                at_ms,
                simplified,
                accepted: rejected.is_none(),
            });

            match rejected {
                Some(err) => Err(err),
                None => {
                    let id = format!("sim-{}-{}", scene_index, attempt);
                    state.operations.insert(
                        id.clone(),
                        RunningOperation {
                            remaining_pending: script.pending_polls,
                            script,
                            scene_index,
                            attempt,
                        },
                    );
                    Ok(OperationHandle::new(id, target.clone()))
                }
            }
        };

        Self::delay(self.scenario.latency.submit_ms).await;
        result
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError> {
        Self::delay(self.scenario.latency.poll_ms).await;

        let mut state = self.state.lock();
        state.poll_calls += 1;
        let operation = state.operations.get_mut(&handle.id).ok_or_else(|| {
            ProviderError::http(404, format!("operation {} not found", handle.id))
        })?;

        if operation.script.hang {
            return Ok(PollStatus::Pending);
        }
        if operation.remaining_pending > 0 {
            operation.remaining_pending -= 1;
            return Ok(PollStatus::Pending);
        }
        if let Some(err) = &operation.script.fail {
            return Ok(PollStatus::Failed(err.to_provider_error()));
        }
        let result_uri = operation.script.result_uri.clone().unwrap_or_else(|| {
            format!(
                "gs://genjob-sim/{}/scene-{}-attempt-{}.mp4",
                handle.target.model_id, operation.scene_index, operation.attempt
            )
        });
        Ok(PollStatus::Done {
            result_uri,
            duration_secs: operation.script.duration_secs,
        })
    }

    async fn download(&self, result_uri: &str, auth: &AuthContext) -> Result<Vec<u8>, ProviderError> {
        Self::delay(self.scenario.latency.download_ms).await;
        self.state.lock().download_calls += 1;
        let auth_label = match auth {
            AuthContext::None => "none",
            AuthContext::Bearer { .. } => "bearer",
            AuthContext::Header { .. } => "header",
            AuthContext::QueryParam { .. } => "query",
        };
        Ok(format!("simulated artifact {} (auth: {})", result_uri, auth_label).into_bytes())
    }

    fn simplify(&self, request: &GenerationRequest) -> GenerationRequest {
        let payload = match &request.payload {
            Value::Object(fields) => {
                let mut fields = fields.clone();
                fields.insert("simplified".to_string(), Value::Bool(true));
                Value::Object(fields)
            }
            other => json!({ "simplified": true, "original": other }),
        };
        GenerationRequest {
            payload,
            ..request.clone()
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
