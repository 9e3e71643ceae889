//! Batch progress events.
//!
//! Best-effort observability stream for a batch run. Emission never blocks and never
//! fails the batch; a dropped receiver simply turns emission into a no-op.

use crate::error::ErrorKind;
use crate::ladder::ProviderTarget;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEventData {
    BatchStarted {
        total: usize,
        ladder_len: usize,
    },
    JobSubmitted {
        scene_index: usize,
        target: ProviderTarget,
        attempt: u32,
        operation_id: String,
    },
    JobRetrying {
        scene_index: usize,
        kind: ErrorKind,
        target: ProviderTarget,
        attempt: u32,
    },
    LadderAdvanced {
        scene_index: usize,
        from: ProviderTarget,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<ProviderTarget>,
        reason: ErrorKind,
    },
    JobSucceeded {
        scene_index: usize,
        result_uri: String,
        elapsed_ms: u64,
    },
    JobFailed {
        scene_index: usize,
        kind: ErrorKind,
        message: String,
    },
    JobMaterialized {
        scene_index: usize,
        public_url: String,
    },
    MaterializationFailed {
        scene_index: usize,
        kind: ErrorKind,
        message: String,
    },
    BatchCompleted {
        success_count: usize,
        failed_count: usize,
        elapsed_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    pub ts: String,
    pub seq: u64,
    #[serde(flatten)]
    pub data: BatchEventData,
}

/// Cloneable handle used by every job of a batch to publish events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<BatchEvent>>,
    seq: Arc<AtomicU64>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<BatchEvent>) -> Self {
        Self {
            tx: Some(tx),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit_best_effort(&self, data: BatchEventData) {
        if let Some(tx) = &self.tx {
            let event = BatchEvent {
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                data,
            };
            let _ = tx.send(event);
        }
    }
}
