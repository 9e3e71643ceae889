//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::classify::ErrorClassifier;
use crate::cli::help::command_name;
use crate::cli::parse::{Commands, ConfigCommands};
use crate::cli::presentation::{
    format_batch_result_json, format_batch_result_text, format_classification,
    format_config_json, format_config_text, format_ladder_json, format_ladder_text,
    format_validation_report,
};
use crate::config::{ConfigLoader, GenjobConfig};
use crate::error::OrchestratorError;
use crate::events::EventSink;
use crate::ladder::FallbackLadder;
use crate::provider::ProviderError;
use crate::simulate::Scenario;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Runtime context for CLI execution: workspace root and resolved configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: GenjobConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, OrchestratorError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self::with_config(workspace_root, config))
    }

    pub fn with_config(workspace_root: PathBuf, config: GenjobConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &GenjobConfig {
        &self.config
    }

    /// Execute a command and return its rendered output.
    pub fn execute(&self, command: &Commands) -> Result<String, OrchestratorError> {
        let started = Instant::now();
        let name = command_name(command);
        let result = self.execute_inner(command);
        info!(
            command = %name,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    fn execute_inner(&self, command: &Commands) -> Result<String, OrchestratorError> {
        match command {
            Commands::Config { command } => self.handle_config_command(command),
            Commands::Ladder { format } => {
                let ladder = FallbackLadder::new(&self.config.ladder)?;
                if format == "json" {
                    Ok(format_ladder_json(&ladder))
                } else {
                    Ok(format_ladder_text(&ladder, self.config.ladder.models.len()))
                }
            }
            Commands::Classify {
                status,
                message,
                network,
            } => {
                let error = match (status, network) {
                    (Some(code), _) => ProviderError::http(*code, message.clone()),
                    (None, true) => ProviderError::network(message.clone()),
                    (None, false) => ProviderError::operation(message.clone()),
                };
                let kind = ErrorClassifier::new().classify_error(&error);
                Ok(format_classification(kind))
            }
            Commands::Simulate {
                scenario,
                format,
                materialize,
                events,
            } => self.handle_simulate(scenario, format, *materialize, *events),
        }
    }

    fn handle_config_command(&self, command: &ConfigCommands) -> Result<String, OrchestratorError> {
        match command {
            ConfigCommands::Show { format } => {
                if format == "json" {
                    Ok(format_config_json(&self.config))
                } else {
                    Ok(format_config_text(&self.config))
                }
            }
            ConfigCommands::Validate => {
                let report = self.config.validate();
                let text = format_validation_report(&report);
                match report {
                    Ok(()) => Ok(text),
                    Err(_) => Err(OrchestratorError::Config(text)),
                }
            }
        }
    }

    fn handle_simulate(
        &self,
        scenario_path: &Path,
        format: &str,
        materialize: bool,
        events: bool,
    ) -> Result<String, OrchestratorError> {
        let mut scenario = Scenario::from_path(scenario_path)?;
        if scenario.ladder.models.is_empty() && scenario.ladder.credentials.is_empty() {
            scenario.ladder = self.config.ladder.clone();
        }
        let storage_root = materialize.then(|| self.storage_root());
        let (sink, mut rx) = if events {
            let (sink, rx) = EventSink::channel();
            (sink, Some(rx))
        } else {
            (EventSink::disabled(), None)
        };

        let runtime = tokio::runtime::Runtime::new()?;
        let (result, _submissions) =
            runtime.block_on(scenario.run(storage_root.as_deref(), sink))?;

        let mut output = if format == "json" {
            format_batch_result_json(&result)
        } else {
            format_batch_result_text(&result)
        };
        if let Some(rx) = rx.as_mut() {
            output.push('\n');
            while let Ok(event) = rx.try_recv() {
                output.push('\n');
                output.push_str(&serde_json::to_string(&event).unwrap_or_default());
            }
        }
        Ok(output)
    }

    fn storage_root(&self) -> PathBuf {
        let root = &self.config.storage.root;
        if root.is_absolute() {
            root.clone()
        } else {
            self.workspace_root.join(root)
        }
    }
}
