//! Configuration System
//!
//! Layered configuration for batch runs: built-in defaults, a user-level file, workspace
//! files, then `GENJOB__*` environment variables. Holds the fallback ladder, timing policy,
//! artifact storage and logging settings.

use crate::ladder::LadderConfig;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenjobConfig {
    /// Fallback models and credentials
    #[serde(default)]
    pub ladder: LadderConfig,

    /// Submission, polling and retry timing
    #[serde(default)]
    pub timing: TimingConfig,

    /// Artifact storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timing policy for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Sleep between poll calls for one job
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock ceiling per logical job, across every fallback retry
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Minimum gap between any two submissions in a batch
    #[serde(default = "default_min_submit_gap_ms")]
    pub min_submit_gap_ms: u64,

    /// Maximum jobs polling at once (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_polls: usize,

    /// Same-target retries for timeouts and network failures
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,

    /// Simplified-request retries after a safety rejection
    #[serde(default = "default_max_safety_retries")]
    pub max_safety_retries: u32,

    /// Whole-batch ceiling (0 = derived from the per-job ceilings)
    #[serde(default)]
    pub batch_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_wait_ms() -> u64 {
    10 * 60 * 1000
}

fn default_min_submit_gap_ms() -> u64 {
    2_500
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_max_safety_retries() -> u32 {
    1
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
            min_submit_gap_ms: default_min_submit_gap_ms(),
            max_concurrent_polls: 0,
            max_transient_retries: default_max_transient_retries(),
            max_safety_retries: default_max_safety_retries(),
            batch_timeout_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn min_submit_gap(&self) -> Duration {
        Duration::from_millis(self.min_submit_gap_ms)
    }

    pub fn max_concurrent_polls(&self) -> Option<usize> {
        (self.max_concurrent_polls > 0).then_some(self.max_concurrent_polls)
    }

    /// Ceiling for a batch of `jobs` requests.
    ///
    /// Without an explicit override this is the sum of per-job ceilings plus the submission
    /// gaps the throttle can impose.
    pub fn batch_timeout(&self, jobs: usize) -> Duration {
        if self.batch_timeout_ms > 0 {
            return Duration::from_millis(self.batch_timeout_ms);
        }
        let per_job = self
            .max_wait_ms
            .saturating_add(self.poll_interval_ms)
            .saturating_add(self.min_submit_gap_ms);
        Duration::from_millis(per_job.saturating_mul(jobs.max(1) as u64))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        if self.max_wait_ms == 0 {
            return Err("max_wait_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the local storage sink
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".genjob/artifacts")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Ladder(String),
    Timing(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Ladder(msg) => write!(f, "Ladder: {}", msg),
            ValidationError::Timing(msg) => write!(f, "Timing: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl GenjobConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.ladder.validate() {
            errors.push(ValidationError::Ladder(e));
        }
        if let Err(e) = self.timing.validate() {
            errors.push(ValidationError::Timing(e));
        }
        if self.storage.root.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Storage root cannot be empty".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
