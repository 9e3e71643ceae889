//! Ladder and classifier presentation.

use crate::error::ErrorKind;
use crate::ladder::{FallbackLadder, LadderAction};
use comfy_table::Table;
use serde_json::json;

fn action_label(action: LadderAction) -> &'static str {
    match action {
        LadderAction::Advance => "advance ladder and resubmit",
        LadderAction::RetrySimplified => "retry once with simplified request",
        LadderAction::RetrySame => "retry same target",
        LadderAction::Fail => "fail job",
    }
}

pub fn format_ladder_text(ladder: &FallbackLadder, model_count: usize) -> String {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["#", "Model", "Credential"]);
    for (rank, target) in ladder.targets().iter().enumerate() {
        table.add_row(vec![
            rank.to_string(),
            target.model_id.clone(),
            target.credential_id.clone(),
        ]);
    }
    format!(
        "{}\n\n{} target(s): {} model(s) x {} credential(s)",
        table,
        ladder.len(),
        model_count,
        ladder.len() / model_count.max(1)
    )
}

pub fn format_ladder_json(ladder: &FallbackLadder) -> String {
    let out = json!({ "targets": ladder.targets(), "total": ladder.len() });
    serde_json::to_string_pretty(&out).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_classification(kind: ErrorKind) -> String {
    format!(
        "kind: {}\naction: {}",
        kind,
        action_label(LadderAction::for_kind(kind))
    )
}
