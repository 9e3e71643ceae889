//! Config command presentation: resolved settings and validation report.

use crate::config::{GenjobConfig, ValidationError};

pub fn format_config_text(config: &GenjobConfig) -> String {
    let timing = &config.timing;
    let mut output = String::from("Ladder:\n");
    output.push_str(&format!("  models:      {}\n", config.ladder.models.join(", ")));
    output.push_str(&format!(
        "  credentials: {}\n",
        config.ladder.credentials.join(", ")
    ));
    output.push_str("\nTiming:\n");
    output.push_str(&format!("  poll_interval_ms:      {}\n", timing.poll_interval_ms));
    output.push_str(&format!("  max_wait_ms:           {}\n", timing.max_wait_ms));
    output.push_str(&format!("  min_submit_gap_ms:     {}\n", timing.min_submit_gap_ms));
    match timing.max_concurrent_polls() {
        Some(limit) => output.push_str(&format!("  max_concurrent_polls:  {}\n", limit)),
        None => output.push_str("  max_concurrent_polls:  unbounded\n"),
    }
    output.push_str(&format!(
        "  max_transient_retries: {}\n",
        timing.max_transient_retries
    ));
    output.push_str(&format!(
        "  max_safety_retries:    {}\n",
        timing.max_safety_retries
    ));
    if timing.batch_timeout_ms > 0 {
        output.push_str(&format!("  batch_timeout_ms:      {}\n", timing.batch_timeout_ms));
    } else {
        output.push_str("  batch_timeout_ms:      derived per batch\n");
    }
    output.push_str(&format!(
        "\nStorage:\n  root: {}\n",
        config.storage.root.display()
    ));
    output.push_str(&format!(
        "\nLogging:\n  level: {}\n  format: {}\n  output: {}",
        config.logging.level, config.logging.format, config.logging.output
    ));
    output
}

pub fn format_config_json(config: &GenjobConfig) -> String {
    serde_json::to_string_pretty(config).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_validation_report(result: &Result<(), Vec<ValidationError>>) -> String {
    match result {
        Ok(()) => "Configuration is valid.".to_string(),
        Err(errors) => {
            let mut output = format!("Configuration has {} error(s):", errors.len());
            for error in errors {
                output.push_str(&format!("\n  - {}", error));
            }
            output
        }
    }
}
