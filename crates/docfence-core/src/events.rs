//! Structured observability events.
//!
//! Components report what they decide and what they do through an
//! [`ObservabilitySink`]. Emitting is fire-and-forget: `emit` takes the event
//! by value, returns nothing and must not block on I/O the caller waits on.

use serde::Serialize;

use crate::error::DenialReason;
use crate::models::{BuildSummary, SearchMode};

/// One observable occurrence in the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A path authorization decision.
    Authorization {
        path: String,
        allowed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<DenialReason>,
    },
    BuildStarted {
        index: String,
        build_id: String,
        root: Option<String>,
    },
    BuildCompleted {
        index: String,
        build_id: String,
        summary: BuildSummary,
    },
    BuildFailed {
        index: String,
        build_id: String,
        kind: String,
        error: String,
    },
    GenerationCommitted {
        index: String,
        generation: u64,
        live_entries: usize,
        tombstones: usize,
    },
    EmbeddingRetry {
        index: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    QueryCompleted {
        index: String,
        mode: SearchMode,
        k: usize,
        hits: usize,
        generation: u64,
        latency_ms: u64,
        cached: bool,
    },
    QueryFailed {
        index: String,
        mode: SearchMode,
        error: String,
    },
    /// A persisted generation failed verification; the index fell back.
    CorruptionDetected {
        index: String,
        generation: u64,
        error: String,
        fallback: Option<u64>,
    },
    Compacted {
        index: String,
        generation: Option<u64>,
        tombstones_removed: usize,
        generations_reclaimed: usize,
    },
}

impl Event {
    /// Stable event name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Authorization { .. } => "authorization",
            Event::BuildStarted { .. } => "build_started",
            Event::BuildCompleted { .. } => "build_completed",
            Event::BuildFailed { .. } => "build_failed",
            Event::GenerationCommitted { .. } => "generation_committed",
            Event::EmbeddingRetry { .. } => "embedding_retry",
            Event::QueryCompleted { .. } => "query_completed",
            Event::QueryFailed { .. } => "query_failed",
            Event::CorruptionDetected { .. } => "corruption_detected",
            Event::Compacted { .. } => "compacted",
        }
    }
}

/// Receives events from the core. Implementations write to logs, stderr or
/// a metrics pipeline.
pub trait ObservabilitySink: Send + Sync {
    /// Emit an event. Called inline from core operations.
    fn emit(&self, event: Event);
}

/// Discards every event.
pub struct NullSink;

impl ObservabilitySink for NullSink {
    fn emit(&self, _event: Event) {}
}
