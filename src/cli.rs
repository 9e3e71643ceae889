//! CLI domain: parse, route, help, output, and presentation only.
//! No orchestration logic; a single route table dispatches to library services.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::command_name;
pub use output::map_error;
pub use parse::{Cli, Commands, ConfigCommands};
pub use presentation::{
    format_batch_result_json, format_batch_result_text, format_classification,
    format_config_json, format_config_text, format_ladder_json, format_ladder_text,
    format_validation_report,
};
pub use route::RunContext;
