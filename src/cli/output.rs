//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::OrchestratorError;

/// Map orchestrator errors to a string for CLI output.
pub fn map_error(e: &OrchestratorError) -> String {
    match e {
        OrchestratorError::EmptyLadder(msg) => format!(
            "{}\n\nConfigure [ladder] models and credentials in config/config.toml.",
            msg
        ),
        other => other.to_string(),
    }
}
