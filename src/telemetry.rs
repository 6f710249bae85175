//! Logging setup and observability sinks.
//!
//! Logs and events go to **stderr** so stdout remains parseable for scripts.
//! [`init_tracing`] installs the global subscriber once per process;
//! `RUST_LOG` overrides the configured level.
//!
//! Sinks:
//! - [`TracingSink`]: one `tracing` event per engine [`Event`] (default).
//! - [`JsonSink`]: one JSON object per line on stderr, for log shippers.

use std::io::Write;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use docfence_core::events::{Event, ObservabilitySink};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // A subscriber may already be set (tests, embedding applications).
    let _ = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    Ok(())
}

/// Forwards events to `tracing`. Denials log at `warn`, corruption and
/// failures at `error`.
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn emit(&self, event: Event) {
        match &event {
            Event::Authorization {
                path,
                allowed: true,
                ..
            } => tracing::debug!(path = %path, "path authorized"),
            Event::Authorization { path, reason, .. } => {
                let reason = reason.map(|r| r.as_str()).unwrap_or("unknown");
                warn!(path = %path, reason, "path denied");
            }
            Event::BuildStarted {
                index,
                build_id,
                root,
            } => info!(index = %index, build_id = %build_id, root = ?root, "build started"),
            Event::BuildCompleted {
                index,
                build_id,
                summary,
            } => info!(
                index = %index,
                build_id = %build_id,
                added = summary.added,
                updated = summary.updated,
                removed = summary.removed,
                skipped = summary.skipped,
                embedded = summary.chunks_embedded,
                generation = ?summary.generation,
                duration_ms = summary.duration_ms,
                "build completed"
            ),
            Event::BuildFailed {
                index,
                build_id,
                kind,
                error,
            } => error!(index = %index, build_id = %build_id, kind = %kind, error = %error, "build failed"),
            Event::GenerationCommitted {
                index,
                generation,
                live_entries,
                tombstones,
            } => info!(index = %index, generation, live_entries, tombstones, "generation committed"),
            Event::EmbeddingRetry {
                index,
                attempt,
                delay_ms,
                reason,
            } => warn!(index = %index, attempt, delay_ms, reason = %reason, "retrying embedding batch"),
            Event::QueryCompleted {
                index,
                mode,
                k,
                hits,
                generation,
                latency_ms,
                cached,
            } => info!(
                index = %index,
                mode = %mode,
                k,
                hits,
                generation,
                latency_ms,
                cached,
                "query completed"
            ),
            Event::QueryFailed { index, mode, error } => {
                warn!(index = %index, mode = %mode, error = %error, "query failed")
            }
            Event::CorruptionDetected {
                index,
                generation,
                error,
                fallback,
            } => error!(index = %index, generation, fallback = ?fallback, error = %error, "corrupt generation"),
            Event::Compacted {
                index,
                generation,
                tombstones_removed,
                generations_reclaimed,
            } => info!(
                index = %index,
                generation = ?generation,
                tombstones_removed,
                generations_reclaimed,
                "compaction finished"
            ),
        }
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonSink;

impl ObservabilitySink for JsonSink {
    fn emit(&self, event: Event) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Pick a sink by name: `tracing` (default) or `json`.
pub fn sink_for(format: &str) -> Box<dyn ObservabilitySink> {
    match format {
        "json" => Box::new(JsonSink),
        _ => Box::new(TracingSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfence_core::DenialReason;

    #[test]
    fn sinks_accept_every_event_without_panicking() {
        let events = vec![
            Event::Authorization {
                path: "/docs/.env".into(),
                allowed: false,
                reason: Some(DenialReason::DeniedPattern),
            },
            Event::Compacted {
                index: "docs".into(),
                generation: Some(3),
                tombstones_removed: 2,
                generations_reclaimed: 1,
            },
        ];
        for e in events {
            TracingSink.emit(e.clone());
            JsonSink.emit(e);
        }
    }

    #[test]
    fn init_is_idempotent() {
        let cfg = LoggingConfig::default();
        init_tracing(&cfg).unwrap();
        init_tracing(&cfg).unwrap();
    }
}
