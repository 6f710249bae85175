//! Immutable index generations and the copy-on-write builder.
//!
//! A [`Generation`] is a complete, read-only snapshot of an index: entries
//! keyed by chunk id, per-document records, inverted keyword postings and a
//! checksum over the whole content. Generations are never edited once built.
//! Changes go through a [`GenerationBuilder`] seeded from the parent; entries
//! are shared between generations behind `Arc`, so staging a small update
//! does not copy vectors.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::IndexError;
use crate::models::{DocumentRecord, IndexEntry};

/// A committed, immutable snapshot of one index.
#[derive(Debug, Clone)]
pub struct Generation {
    id: u64,
    dimension: usize,
    entries: BTreeMap<String, Arc<IndexEntry>>,
    documents: BTreeMap<String, DocumentRecord>,
    postings: HashMap<String, Vec<(String, u32)>>,
    live_count: usize,
    total_live_length: u64,
    checksum: String,
}

impl Generation {
    /// The empty generation every index starts from (id 0).
    pub fn empty(dimension: usize) -> Self {
        Self::assemble(0, dimension, BTreeMap::new(), BTreeMap::new())
    }

    /// Rebuild a generation from persisted parts.
    ///
    /// Fails when an entry's vector does not match `dimension`.
    pub fn from_parts(
        index: &str,
        id: u64,
        dimension: usize,
        entries: Vec<IndexEntry>,
        documents: Vec<DocumentRecord>,
    ) -> Result<Self, IndexError> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.vector.len() != dimension {
                return Err(IndexError::DimensionConflict {
                    index: index.to_string(),
                    expected: dimension,
                    actual: entry.vector.len(),
                });
            }
            map.insert(entry.chunk_id.clone(), Arc::new(entry));
        }
        let docs = documents
            .into_iter()
            .map(|d| (d.path.clone(), d))
            .collect();
        Ok(Self::assemble(id, dimension, map, docs))
    }

    fn assemble(
        id: u64,
        dimension: usize,
        entries: BTreeMap<String, Arc<IndexEntry>>,
        documents: BTreeMap<String, DocumentRecord>,
    ) -> Self {
        let mut postings: HashMap<String, Vec<(String, u32)>> = HashMap::new();
        let mut live_count = 0;
        let mut total_live_length = 0u64;
        for entry in entries.values().filter(|e| !e.tombstone) {
            live_count += 1;
            total_live_length += u64::from(entry.length());
            for (term, tf) in &entry.terms {
                postings
                    .entry(term.clone())
                    .or_default()
                    .push((entry.chunk_id.clone(), *tf));
            }
        }
        let checksum = compute_checksum(
            id,
            dimension,
            entries.values().map(|e| e.as_ref()),
            documents.values(),
        );
        Self {
            id,
            dimension,
            entries,
            documents,
            postings,
            live_count,
            total_live_length,
            checksum,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// SHA-256 over the id and every entry and document record.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// All entries including tombstones, ordered by chunk id.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values().map(|e| e.as_ref())
    }

    /// Entries that are visible to search, ordered by chunk id.
    pub fn live_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries().filter(|e| !e.tombstone)
    }

    pub fn entry(&self, chunk_id: &str) -> Option<&IndexEntry> {
        self.entries.get(chunk_id).map(|e| e.as_ref())
    }

    pub fn is_live(&self, chunk_id: &str) -> bool {
        self.entry(chunk_id).is_some_and(|e| !e.tombstone)
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.values()
    }

    pub fn document(&self, path: &str) -> Option<&DocumentRecord> {
        self.documents.get(path)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn tombstone_count(&self) -> usize {
        self.entries.len() - self.live_count
    }

    /// Fraction of entries that are tombstoned.
    pub fn tombstone_ratio(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.tombstone_count() as f64 / self.entries.len() as f64
    }

    /// Postings `(chunk_id, term_frequency)` for one term over live entries.
    pub fn postings(&self, term: &str) -> &[(String, u32)] {
        self.postings.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mean keyword length over live entries.
    pub fn average_length(&self) -> f64 {
        if self.live_count == 0 {
            return 0.0;
        }
        self.total_live_length as f64 / self.live_count as f64
    }

    /// Start staging the next generation from this one.
    pub fn builder(&self, index: &str, next_id: u64) -> GenerationBuilder {
        GenerationBuilder {
            index: index.to_string(),
            id: next_id,
            dimension: self.dimension,
            entries: self.entries.clone(),
            documents: self.documents.clone(),
            dirty: false,
        }
    }
}

/// Staging area for the next generation.
///
/// Holds shared references to the parent's entries; mutations only replace
/// map slots, never the parent's data.
#[derive(Debug)]
pub struct GenerationBuilder {
    index: String,
    id: u64,
    dimension: usize,
    entries: BTreeMap<String, Arc<IndexEntry>>,
    documents: BTreeMap<String, DocumentRecord>,
    dirty: bool,
}

impl GenerationBuilder {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn entry(&self, chunk_id: &str) -> Option<&IndexEntry> {
        self.entries.get(chunk_id).map(|e| e.as_ref())
    }

    pub fn is_live(&self, chunk_id: &str) -> bool {
        self.entry(chunk_id).is_some_and(|e| !e.tombstone)
    }

    pub fn document(&self, path: &str) -> Option<&DocumentRecord> {
        self.documents.get(path)
    }

    /// Paths of every document currently recorded.
    pub fn document_paths(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    /// Insert or replace an entry; a tombstoned entry with the same id is revived.
    pub fn insert_entry(&mut self, entry: IndexEntry) -> Result<(), IndexError> {
        if entry.vector.len() != self.dimension {
            return Err(IndexError::DimensionConflict {
                index: self.index.clone(),
                expected: self.dimension,
                actual: entry.vector.len(),
            });
        }
        self.entries.insert(entry.chunk_id.clone(), Arc::new(entry));
        self.dirty = true;
        Ok(())
    }

    /// Mark an entry as removed. Returns `false` if it was absent or already
    /// tombstoned.
    pub fn tombstone(&mut self, chunk_id: &str) -> bool {
        match self.entries.get_mut(chunk_id) {
            Some(slot) if !slot.tombstone => {
                let mut entry = (**slot).clone();
                entry.tombstone = true;
                *slot = Arc::new(entry);
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    pub fn put_document(&mut self, record: DocumentRecord) {
        if self.documents.get(&record.path) != Some(&record) {
            self.documents.insert(record.path.clone(), record);
            self.dirty = true;
        }
    }

    /// Drop a document record and tombstone every live entry it owned.
    pub fn remove_document(&mut self, path: &str) -> Option<DocumentRecord> {
        let record = self.documents.remove(path)?;
        self.dirty = true;
        let owned: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.document_path == path && !e.tombstone)
            .map(|e| e.chunk_id.clone())
            .collect();
        for id in owned {
            self.tombstone(&id);
        }
        Some(record)
    }

    /// Physically drop tombstoned entries. Returns how many were removed.
    pub fn purge_tombstones(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.tombstone);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Freeze the staged state into an immutable generation.
    pub fn build(self) -> Generation {
        Generation::assemble(self.id, self.dimension, self.entries, self.documents)
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Checksum over a generation's full content, in key order.
pub fn compute_checksum<'a>(
    id: u64,
    dimension: usize,
    entries: impl Iterator<Item = &'a IndexEntry>,
    documents: impl Iterator<Item = &'a DocumentRecord>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.to_le_bytes());
    hasher.update((dimension as u64).to_le_bytes());
    for e in entries {
        write_field(&mut hasher, e.chunk_id.as_bytes());
        write_field(&mut hasher, e.document_path.as_bytes());
        hasher.update(e.ordinal.to_le_bytes());
        hasher.update(e.offset.to_le_bytes());
        write_field(&mut hasher, e.text.as_bytes());
        write_field(&mut hasher, e.content_hash.as_bytes());
        hasher.update([u8::from(e.tombstone)]);
        for (term, tf) in &e.terms {
            write_field(&mut hasher, term.as_bytes());
            hasher.update(tf.to_le_bytes());
        }
        write_field(&mut hasher, &crate::embedding::vec_to_blob(&e.vector));
    }
    for d in documents {
        write_field(&mut hasher, d.path.as_bytes());
        write_field(&mut hasher, d.format.as_str().as_bytes());
        hasher.update(d.size.to_le_bytes());
        hasher.update(d.modified_at.to_le_bytes());
        write_field(&mut hasher, d.content_hash.as_bytes());
        for id in &d.chunk_ids {
            write_field(&mut hasher, id.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
