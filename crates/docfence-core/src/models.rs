//! Core data models shared by the indexer, the store and the ranker.
//!
//! - [`Chunk`]: an immutable text span cut from one document.
//! - [`IndexEntry`]: a chunk as stored in a generation (vector, terms, tombstone).
//! - [`DocumentRecord`]: per-document metadata used for change detection.
//! - [`SearchHit`]: one ranked result returned to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DenialReason;

/// Supported document formats, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Text,
    Markdown,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl DocumentFormat {
    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" | "csv" | "rst" => Some(DocumentFormat::Text),
            "md" | "markdown" => Some(DocumentFormat::Markdown),
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "pptx" => Some(DocumentFormat::Pptx),
            "xlsx" => Some(DocumentFormat::Xlsx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "text",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(DocumentFormat::Text),
            "markdown" => Ok(DocumentFormat::Markdown),
            "pdf" => Ok(DocumentFormat::Pdf),
            "docx" => Ok(DocumentFormat::Docx),
            "pptx" => Ok(DocumentFormat::Pptx),
            "xlsx" => Ok(DocumentFormat::Xlsx),
            other => Err(format!("unknown document format: {}", other)),
        }
    }
}

/// A text span produced by the chunker.
///
/// Chunks are immutable: a changed document yields new chunks with new ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from document path, ordinal and content hash.
    pub id: String,
    /// Canonical path of the parent document.
    pub document_path: String,
    /// Zero-based position within the document.
    pub ordinal: u32,
    /// Byte offset of the span in the extracted text.
    pub offset: u64,
    pub text: String,
    /// Keyword tokens, see [`crate::tokenize`].
    pub tokens: Vec<String>,
    /// SHA-256 of `text`, hex encoded.
    pub content_hash: String,
    /// Attached once computed.
    pub vector: Option<Vec<f32>>,
}

/// A chunk as it lives inside a committed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_path: String,
    pub ordinal: u32,
    pub offset: u64,
    pub text: String,
    pub content_hash: String,
    /// Term frequencies for this entry, sorted by term.
    pub terms: Vec<(String, u32)>,
    pub vector: Vec<f32>,
    /// Set when the source document disappeared; excluded from search.
    pub tombstone: bool,
}

impl IndexEntry {
    /// Build an entry from a chunk whose vector has been computed.
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        let terms = crate::tokenize::term_frequencies(&chunk.tokens);
        Self {
            chunk_id: chunk.id,
            document_path: chunk.document_path,
            ordinal: chunk.ordinal,
            offset: chunk.offset,
            text: chunk.text,
            content_hash: chunk.content_hash,
            terms,
            vector,
            tombstone: false,
        }
    }

    /// Total number of keyword tokens in the entry.
    pub fn length(&self) -> u32 {
        self.terms.iter().map(|(_, tf)| *tf).sum()
    }
}

/// Per-document metadata kept in each generation for change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Canonical path (document identity).
    pub path: String,
    pub format: DocumentFormat,
    pub size: u64,
    /// Modification time as Unix seconds.
    pub modified_at: i64,
    pub content_hash: String,
    /// Chunk ids currently live for this document, in ordinal order.
    pub chunk_ids: Vec<String>,
}

/// Similarity function used for semantic scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "inner_product" | "ip" => Ok(Metric::InnerProduct),
            other => Err(format!(
                "Unknown metric: {}. Use cosine or inner_product.",
                other
            )),
        }
    }
}

/// Index structure kind. Only exhaustive (flat) search is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    #[default]
    Flat,
}

/// Index structure type plus its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexStructure {
    pub kind: StructureKind,
    pub metric: Metric,
}

/// Retrieval mode for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            )),
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_path: String,
    pub snippet: String,
    pub score: f64,
    /// Normalized semantic component (hybrid mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    /// Normalized keyword component (hybrid mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
}

/// Outcome of a build or upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Denied, unsupported, unreadable or unchanged documents.
    pub skipped: usize,
    pub chunks_embedded: usize,
    /// Generation committed by this build; `None` when nothing changed.
    pub generation: Option<u64>,
    pub duration_ms: u64,
}

impl BuildSummary {
    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

/// Lifecycle status of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Idle,
    Building,
    Committing,
    /// Serving a fallback generation after a corrupt load.
    Degraded,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Idle => "idle",
            BuildStatus::Building => "building",
            BuildStatus::Committing => "committing",
            BuildStatus::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Point-in-time statistics for one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub dimension: usize,
    pub structure: IndexStructure,
    pub generation: u64,
    pub status: BuildStatus,
    pub documents: usize,
    pub live_entries: usize,
    pub tombstones: usize,
    pub retained_generations: usize,
}

/// One indexed document as listed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub path: String,
    pub format: DocumentFormat,
    pub size: u64,
    pub modified_at: i64,
    pub content_hash: String,
    pub chunks: usize,
    /// Whether the file is still present and allowed by the current policy.
    pub exists: bool,
}

/// Why an indexed document no longer matches what is on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Staleness {
    Missing,
    Changed,
    Denied { reason: DenialReason },
    Unreadable { error: String },
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Missing => f.write_str("missing"),
            Staleness::Changed => f.write_str("changed"),
            Staleness::Denied { reason } => write!(f, "denied: {}", reason),
            Staleness::Unreadable { error } => write!(f, "unreadable: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutdatedDocument {
    pub path: String,
    #[serde(flatten)]
    pub staleness: Staleness,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension_is_case_insensitive() {
        assert_eq!(DocumentFormat::from_extension("MD"), Some(DocumentFormat::Markdown));
        assert_eq!(DocumentFormat::from_extension("pdf"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("exe"), None);
    }

    #[test]
    fn format_string_roundtrip() {
        for f in [
            DocumentFormat::Text,
            DocumentFormat::Markdown,
            DocumentFormat::Pdf,
            DocumentFormat::Docx,
            DocumentFormat::Pptx,
            DocumentFormat::Xlsx,
        ] {
            assert_eq!(f.as_str().parse::<DocumentFormat>().unwrap(), f);
        }
    }

    #[test]
    fn search_mode_rejects_unknown() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[test]
    fn summary_changes() {
        let mut s = BuildSummary::default();
        assert!(!s.has_changes());
        s.removed = 1;
        assert!(s.has_changes());
    }
}
