//! CLI parse: clap types for genjob. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// genjob CLI - long-running generation job orchestration
#[derive(Parser)]
#[command(name = "genjob")]
#[command(about = "Orchestrate long-running generative media jobs with fallback and throttling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configuration commands (show, validate)
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Show the fallback order the configured ladder produces
    Ladder {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Classify a provider error the way the poller would
    Classify {
        /// HTTP status code; omit for errors without an HTTP response
        #[arg(long)]
        status: Option<u16>,
        /// Provider error message
        #[arg(long)]
        message: String,
        /// Treat a missing status as a network failure (no response received)
        #[arg(long)]
        network: bool,
    },
    /// Run a scripted batch through the orchestrator without any provider
    Simulate {
        /// Scenario file (TOML)
        scenario: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
        /// Materialize succeeded artifacts into the configured storage root
        #[arg(long)]
        materialize: bool,
        /// Print progress events as JSON lines after the result
        #[arg(long)]
        events: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Validate the resolved configuration
    Validate,
}
