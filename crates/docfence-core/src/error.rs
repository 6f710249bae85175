//! Typed error taxonomy shared by every component.
//!
//! Authorization failures, embedding failures, index lifecycle errors and
//! corruption are distinct variants so callers can react to each without
//! string matching. I/O and storage backends are wrapped rather than
//! flattened so their sources stay inspectable.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a path was refused. This is a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The canonical path is not under any allowed directory.
    OutsideWhitelist,
    /// The request tried to climb out with relative or encoded segments.
    PathTraversal,
    /// A path component matched a deny pattern.
    DeniedPattern,
    /// The path lies inside the whitelist but does not exist.
    NotFound,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::OutsideWhitelist => "outside_whitelist",
            DenialReason::PathTraversal => "path_traversal",
            DenialReason::DeniedPattern => "denied_pattern",
            DenialReason::NotFound => "not_found",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures from the embedding collaborator.
///
/// Providers only ever return `Retryable` or `Fatal` for a single call.
/// The index manager turns those into `Exhausted` or `Aborted` once it
/// knows which chunks were in the failed batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    /// Timeout, rate limit, 5xx or network failure.
    #[error("transient embedding failure: {reason}")]
    Retryable { reason: String },
    /// Authentication failure or malformed input.
    #[error("fatal embedding failure: {reason}")]
    Fatal { reason: String },
    #[error("embedding failed after {attempts} attempts ({} chunks): {reason}", .failed_chunks.len())]
    Exhausted {
        attempts: u32,
        failed_chunks: Vec<String>,
        reason: String,
    },
    #[error("embedding aborted ({} chunks): {reason}", .failed_chunks.len())]
    Aborted {
        failed_chunks: Vec<String>,
        reason: String,
    },
}

impl EmbeddingError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        EmbeddingError::Retryable {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        EmbeddingError::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Retryable { .. })
    }

    /// Chunk ids that were part of the failed batch, if known.
    pub fn failed_chunks(&self) -> &[String] {
        match self {
            EmbeddingError::Exhausted { failed_chunks, .. }
            | EmbeddingError::Aborted { failed_chunks, .. } => failed_chunks,
            _ => &[],
        }
    }
}

/// Index lifecycle errors, always reported synchronously.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    #[error("index '{index}' has dimension {expected}, got {actual}")]
    DimensionConflict {
        index: String,
        expected: usize,
        actual: usize,
    },
    #[error("a build is already in progress for index '{0}'")]
    BuildInProgress(String),
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("build cancelled for index '{0}'")]
    Cancelled(String),
    #[error("invalid index name '{0}': use 1-64 characters from [A-Za-z0-9_-]")]
    InvalidName(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// A persisted generation failed verification on load.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CorruptionError {
    #[error("generation {generation} of '{index}' failed checksum: expected {expected}, found {found}")]
    ChecksumMismatch {
        index: String,
        generation: u64,
        expected: String,
        found: String,
    },
    #[error("generation {generation} of '{index}' is unreadable: {reason}")]
    Unreadable {
        index: String,
        generation: u64,
        reason: String,
    },
    #[error("generation {generation} of '{index}' is missing")]
    Missing { index: String, generation: u64 },
}

/// Umbrella error for every engine operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("access denied for {path}: {reason}")]
    Authorization { path: String, reason: DenialReason },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Corruption(#[from] CorruptionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl Error {
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Storage(Box::new(err))
    }

    /// Short machine-friendly label used in observability events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Authorization { .. } => "authorization",
            Error::Embedding(_) => "embedding",
            Error::Index(_) => "index",
            Error::Corruption(_) => "corruption",
            Error::Io(_) => "io",
            Error::Storage(_) => "storage",
            Error::Parse { .. } => "parse",
            Error::Config(_) => "config",
            Error::Timeout { .. } => "timeout",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::storage(err)
    }
}
