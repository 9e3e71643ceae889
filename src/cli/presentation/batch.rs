//! Batch result presentation: per-scene table and summary.

use crate::aggregate::BatchResult;
use crate::job::{JobOutcome, Materialization};
use comfy_table::Table;
use owo_colors::OwoColorize;

fn target_label(outcome: &JobOutcome) -> String {
    outcome
        .artifact
        .as_ref()
        .map(|artifact| artifact.target.to_string())
        .or_else(|| outcome.targets_tried.last().map(ToString::to_string))
        .unwrap_or_else(|| "-".to_string())
}

fn detail(outcome: &JobOutcome) -> String {
    if let Some(err) = &outcome.error {
        return format!("{}: {}", err.kind, err.message);
    }
    match &outcome.materialization {
        Materialization::Stored(reference) => reference.public_url.clone(),
        Materialization::Failed(err) => format!("materialization {}: {}", err.kind, err.message),
        Materialization::Skipped => outcome
            .artifact
            .as_ref()
            .map(|artifact| artifact.result_uri.clone())
            .unwrap_or_default(),
    }
}

pub fn format_batch_result_text(result: &BatchResult) -> String {
    if result.is_empty() {
        return "Batch was empty.".to_string();
    }

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Scene", "State", "Target", "Attempts", "Elapsed", "Detail"]);
    for outcome in &result.outcomes {
        table.add_row(vec![
            outcome.scene_index.to_string(),
            outcome.state.to_string(),
            target_label(outcome),
            outcome.attempts.to_string(),
            format!("{:.1}s", outcome.elapsed_ms as f64 / 1000.0),
            detail(outcome),
        ]);
    }

    let summary = format!("{}/{} succeeded", result.success_count, result.len());
    let summary = if result.all_succeeded() {
        summary.green().to_string()
    } else if result.success_count == 0 {
        summary.red().to_string()
    } else {
        summary.yellow().to_string()
    };

    let mut output = format!("{}\n\n{}", table, summary);
    output.push_str(&format!(
        "\nFailed: {}",
        result.failed_count
    ));
    if result.materialization_failed_count > 0 {
        output.push_str(&format!(
            " ({} generated but not stored)",
            result.materialization_failed_count
        ));
    }
    output.push_str(&format!(
        "\nTotal duration: {:.1}s",
        result.total_duration_secs
    ));
    if !result.all_succeeded() {
        let indices: Vec<String> = result
            .failed_indices()
            .iter()
            .map(ToString::to_string)
            .collect();
        output.push_str(&format!("\nFailed scenes: {}", indices.join(", ")));
    }
    output
}

pub fn format_batch_result_json(result: &BatchResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
}
