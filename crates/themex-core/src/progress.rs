//! Run progress reporting.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ids::RunId;

/// Coarse stage of a pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Checking the excerpt set.
    Validating,
    /// Generating embeddings.
    Embedding,
    /// Semantic cache lookup.
    CacheLookup,
    /// Optional assistant-driven excerpt splitting.
    Splitting,
    /// Clustering / coding.
    Clustering,
    /// Statistical quality gates.
    QualityGates,
    /// Labeling themes.
    Labeling,
    /// Purpose-specific analysis (saturation curve, synthesis graph, ...).
    Analysis,
    /// Assembling provenance and output.
    Provenance,
    /// Finished.
    Complete,
}

/// One progress update.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Current stage.
    pub stage: Stage,
    /// Overall completion, 0–100.
    pub percent: u8,
    /// Human-readable status.
    pub message: String,
    /// Named counters (excerpts embedded, themes found, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
}

impl ProgressEvent {
    /// Build an event without counters.
    pub fn new(run_id: RunId, stage: Stage, percent: u8, message: impl Into<String>) -> Self {
        Self {
            run_id,
            stage,
            percent: percent.min(100),
            message: message.into(),
            counters: BTreeMap::new(),
        }
    }

    /// Attach a counter.
    #[must_use]
    pub fn with_counter(mut self, name: impl Into<String>, value: u64) -> Self {
        let _ = self.counters.insert(name.into(), value);
        self
    }
}

/// Receives progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded tokio channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening.
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of collected events.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Stages seen, in order, without consecutive duplicates.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = Vec::new();
        for e in self.events.lock().iter() {
            if stages.last() != Some(&e.stage) {
                stages.push(e.stage);
            }
        }
        stages
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
