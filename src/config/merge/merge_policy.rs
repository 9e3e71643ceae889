//! Merge rules: defaults, override order, conflict handling.
//!
//! Later sources win key-by-key: defaults < global file < workspace files < environment.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("timing.poll_interval_ms", 5_000_i64)?
        .set_default("timing.max_wait_ms", 600_000_i64)?
        .set_default("timing.min_submit_gap_ms", 2_500_i64)?
        .set_default("timing.max_concurrent_polls", 0_i64)?
        .set_default("timing.max_transient_retries", 3_i64)?
        .set_default("timing.max_safety_retries", 1_i64)?
        .set_default("timing.batch_timeout_ms", 0_i64)?
        .set_default("storage.root", ".genjob/artifacts")
}
