//! CLI presentation: text and json formatters per command family.

mod batch;
mod config;
mod ladder;

pub use batch::{format_batch_result_json, format_batch_result_text};
pub use config::{format_config_json, format_config_text, format_validation_report};
pub use ladder::{format_classification, format_ladder_json, format_ladder_text};
