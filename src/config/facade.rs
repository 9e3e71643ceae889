//! Config loading facade: assembles sources in precedence order and deserializes.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::GenjobConfig;
use crate::error::OrchestratorError;
use config::File;
use std::path::{Path, PathBuf};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, workspace files, environment.
    pub fn load(workspace_root: &Path) -> Result<GenjobConfig, OrchestratorError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);

        let config = builder.build()?.try_deserialize::<GenjobConfig>()?;
        Ok(config)
    }

    /// Load configuration from one explicit file, still honouring environment overrides.
    pub fn load_from_file(path: &Path) -> Result<GenjobConfig, OrchestratorError> {
        if !path.exists() {
            return Err(OrchestratorError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let builder = merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true));
        let builder = environment::add_to_builder(builder);

        let config = builder.build()?.try_deserialize::<GenjobConfig>()?;
        Ok(config)
    }

    /// Path of the user-level configuration file, if a home directory is known.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
