//! Persistence abstraction for index generations.
//!
//! Each index has one [`IndexManifest`] (the metadata record naming the
//! active generation) plus one durable artifact per committed generation.
//! The [`GenerationStore`] trait hides where those live so the index
//! manager can run against SQLite on disk or the in-memory store in tests.
//!
//! Implementations must make `write_generation` and `write_manifest`
//! all-or-nothing: a reader must never see a half-written artifact.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CorruptionError, IndexError, Result};
use crate::generation::Generation;
use crate::models::IndexStructure;

/// Bookkeeping for one committed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub id: u64,
    pub checksum: String,
    pub entries: usize,
    pub committed_at: DateTime<Utc>,
}

impl GenerationInfo {
    pub fn of(generation: &Generation) -> Self {
        Self {
            id: generation.id(),
            checksum: generation.checksum().to_string(),
            entries: generation.entries().count(),
            committed_at: Utc::now(),
        }
    }
}

/// Persisted metadata record for one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub name: String,
    pub dimension: usize,
    pub structure: IndexStructure,
    /// Active generation; `0` is the implicit empty generation.
    pub current_generation: u64,
    /// Highest generation id ever allocated, so ids never repeat.
    pub last_generation: u64,
    /// Retained generations, oldest first.
    pub generations: Vec<GenerationInfo>,
}

impl IndexManifest {
    pub fn new(name: &str, dimension: usize, structure: IndexStructure) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            structure,
            current_generation: 0,
            last_generation: 0,
            generations: Vec::new(),
        }
    }

    pub fn info(&self, id: u64) -> Option<&GenerationInfo> {
        self.generations.iter().find(|g| g.id == id)
    }

    /// Record a newly committed generation and make it current.
    pub fn commit(&mut self, info: GenerationInfo) {
        self.current_generation = info.id;
        self.last_generation = self.last_generation.max(info.id);
        self.generations.retain(|g| g.id != info.id);
        self.generations.push(info);
    }

    /// Next unused generation id.
    pub fn next_generation(&self) -> u64 {
        self.last_generation + 1
    }
}

/// Durable storage for manifests and generation artifacts.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Every index manifest known to the store.
    async fn list_manifests(&self) -> Result<Vec<IndexManifest>>;

    async fn read_manifest(&self, index: &str) -> Result<Option<IndexManifest>>;

    /// Atomically replace the manifest for `manifest.name`.
    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()>;

    /// Durably write one generation artifact. Returns only once the artifact
    /// is complete and visible under its final name.
    async fn write_generation(&self, index: &str, generation: &Generation) -> Result<()>;

    /// Load and verify a generation against the manifest's bookkeeping.
    async fn read_generation(&self, manifest: &IndexManifest, info: &GenerationInfo)
        -> Result<Generation>;

    /// Remove a generation artifact. Missing artifacts are not an error.
    async fn delete_generation(&self, index: &str, id: u64) -> Result<()>;
}

/// Check a loaded generation against its recorded checksum.
pub fn verify_generation(
    index: &str,
    info: &GenerationInfo,
    generation: Generation,
) -> Result<Generation> {
    if generation.id() != info.id || generation.checksum() != info.checksum {
        return Err(CorruptionError::ChecksumMismatch {
            index: index.to_string(),
            generation: info.id,
            expected: info.checksum.clone(),
            found: generation.checksum().to_string(),
        }
        .into());
    }
    Ok(generation)
}

/// Index names double as directory names, so they are kept to a safe alphabet.
pub fn validate_index_name(name: &str) -> Result<(), IndexError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(IndexError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_are_restricted() {
        assert!(validate_index_name("docs_v2-main").is_ok());
        assert!(validate_index_name("").is_err());
        assert!(validate_index_name("../etc").is_err());
        assert!(validate_index_name("a b").is_err());
        assert!(validate_index_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn manifest_commit_advances_ids() {
        let mut m = IndexManifest::new("docs", 4, IndexStructure::default());
        assert_eq!(m.next_generation(), 1);
        let g = Generation::empty(4).builder("docs", 1).build();
        m.commit(GenerationInfo::of(&g));
        assert_eq!(m.current_generation, 1);
        assert_eq!(m.next_generation(), 2);
        assert!(m.info(1).is_some());
    }

    #[test]
    fn verify_rejects_wrong_checksum() {
        let g = Generation::empty(4).builder("docs", 1).build();
        let mut info = GenerationInfo::of(&g);
        info.checksum = "0".repeat(64);
        let err = verify_generation("docs", &info, g).unwrap_err();
        assert_eq!(err.kind(), "corruption");
    }
}
