//! In-memory [`GenerationStore`] for tests and embedded use.
//!
//! Generations are stored as plain entry and document lists and rebuilt on
//! read, so loads go through the same verification path as durable stores.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{CorruptionError, Result};
use crate::generation::Generation;
use crate::models::{DocumentRecord, IndexEntry};

use super::{verify_generation, GenerationInfo, GenerationStore, IndexManifest};

struct StoredGeneration {
    dimension: usize,
    entries: Vec<IndexEntry>,
    documents: Vec<DocumentRecord>,
}

/// In-memory store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    manifests: RwLock<HashMap<String, IndexManifest>>,
    generations: RwLock<HashMap<(String, u64), StoredGeneration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of generation artifacts held for `index`.
    pub fn generation_count(&self, index: &str) -> usize {
        self.generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(name, _)| name == index)
            .count()
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn list_manifests(&self) -> Result<Vec<IndexManifest>> {
        let manifests = self.manifests.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<IndexManifest> = manifests.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn read_manifest(&self, index: &str) -> Result<Option<IndexManifest>> {
        let manifests = self.manifests.read().unwrap_or_else(PoisonError::into_inner);
        Ok(manifests.get(index).cloned())
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        self.manifests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(manifest.name.clone(), manifest.clone());
        Ok(())
    }

    async fn write_generation(&self, index: &str, generation: &Generation) -> Result<()> {
        let stored = StoredGeneration {
            dimension: generation.dimension(),
            entries: generation.entries().cloned().collect(),
            documents: generation.documents().cloned().collect(),
        };
        self.generations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((index.to_string(), generation.id()), stored);
        Ok(())
    }

    async fn read_generation(
        &self,
        manifest: &IndexManifest,
        info: &GenerationInfo,
    ) -> Result<Generation> {
        let generation = {
            let generations = self.generations.read().unwrap_or_else(PoisonError::into_inner);
            let stored = generations
                .get(&(manifest.name.clone(), info.id))
                .ok_or_else(|| CorruptionError::Missing {
                    index: manifest.name.clone(),
                    generation: info.id,
                })?;
            Generation::from_parts(
                &manifest.name,
                info.id,
                stored.dimension,
                stored.entries.clone(),
                stored.documents.clone(),
            )
            .map_err(|e| CorruptionError::Unreadable {
                index: manifest.name.clone(),
                generation: info.id,
                reason: e.to_string(),
            })?
        };
        verify_generation(&manifest.name, info, generation)
    }

    async fn delete_generation(&self, index: &str, id: u64) -> Result<()> {
        self.generations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(index.to_string(), id));
        Ok(())
    }
}
