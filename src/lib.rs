//! genjob: Long-Running Generation Job Orchestrator
//!
//! Drives batches of long-running generative media jobs (video, speech, music, render) to
//! completion against rate-limited, quota-constrained provider APIs. A shared fallback
//! ladder of (model, credential) targets absorbs quota and disabled-service failures, a
//! throttled scheduler paces submissions while jobs poll concurrently, and every batch
//! returns a per-scene result even when some scenes fail.

pub mod aggregate;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod ladder;
pub mod logging;
pub mod materialize;
pub mod orchestrator;
pub mod poller;
pub mod provider;
pub mod request;
pub mod scheduler;
pub mod simulate;

pub use aggregate::{aggregate, BatchResult};
pub use classify::ErrorClassifier;
pub use config::{GenjobConfig, TimingConfig};
pub use error::{ErrorKind, JobError, OrchestratorError};
pub use job::{JobOutcome, JobState, Materialization};
pub use ladder::{FallbackLadder, LadderConfig, ProviderTarget};
pub use materialize::{LocalStorageSink, ResultMaterializer, StorageReference, StorageSink};
pub use orchestrator::{run_batch, Orchestrator};
pub use provider::{AuthContext, OperationHandle, PollStatus, ProviderAdapter, ProviderError};
pub use request::GenerationRequest;
