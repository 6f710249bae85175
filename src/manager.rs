//! Index lifecycle: creation, incremental builds, commits, recovery and
//! compaction.
//!
//! # Concurrency
//!
//! Every index has its own [`IndexState`]. Readers take the current
//! generation with one atomic load (`ArcSwap`) and keep it for as long as
//! they need; nothing they hold is ever modified. Writers (builds, upserts,
//! document updates, compaction) must hold the index's exclusive lease. A
//! second writer is rejected with `BuildInProgress` rather than queued, so
//! commits are linearizable per index. Distinct indexes share nothing but
//! the registry map.
//!
//! # Build pipeline
//!
//! 1. Authorize the root, acquire the lease.
//! 2. List documents (the loader authorizes every entry).
//! 3. Diff against the current generation by content hash. Every listed
//!    file is hashed; only files whose hash differs are extracted and
//!    re-chunked into a staged [`GenerationBuilder`]. Documents that
//!    vanished from under the root are tombstoned.
//! 4. Embed new chunks in batches, with bounded retry. Vectors of unchanged
//!    chunks are reused from the parent generation or the embedding cache.
//! 5. Commit: write the artifact, then the manifest, then swap the pointer.
//!
//! A failure or cancellation at any step drops the staged builder; the
//! previous generation stays current and queryable.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docfence_core::chunk::content_hash;
use docfence_core::embedding::EmbeddingProvider;
use docfence_core::events::{Event, ObservabilitySink};
use docfence_core::generation::{Generation, GenerationBuilder};
use docfence_core::models::{
    BuildStatus, BuildSummary, Chunk, DocumentFormat, DocumentInfo, DocumentRecord, IndexEntry,
    IndexStats, IndexStructure, OutdatedDocument, Staleness,
};
use docfence_core::store::{validate_index_name, GenerationInfo, GenerationStore, IndexManifest};
use docfence_core::{DenialReason, EmbeddingError, Error, IndexError, Result};

use crate::cache::Cache;
use crate::config::Config;
use crate::loader::{DocumentLoader, DocumentMeta};
use crate::policy::{canonicalize_lenient, AuthorizedPath, Decision, PathValidator};
use crate::retry::RetryPolicy;

/// Tuning knobs for the manager, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Superseded generations kept on disk as corruption fallbacks.
    pub retain_generations: usize,
    pub io_timeout: Duration,
    /// Compact once this fraction of entries is tombstoned.
    pub tombstone_ratio: f64,
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.embedding.batch_size.max(1),
            retry: RetryPolicy::from_config(&config.embedding),
            retain_generations: config.storage.retain_generations,
            io_timeout: config.storage.io_timeout(),
            tombstone_ratio: config.compaction.tombstone_ratio,
        }
    }
}

/// Everything the manager talks to.
pub struct Collaborators {
    pub store: Arc<dyn GenerationStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub loader: Arc<dyn DocumentLoader>,
    pub validator: Arc<PathValidator>,
    /// Chunk embeddings keyed by model and chunk content hash.
    pub embeddings: Arc<Cache<Vec<f32>>>,
    pub sink: Arc<dyn ObservabilitySink>,
}

/// Identity of an index as returned by [`IndexManager::create_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub name: String,
    pub dimension: usize,
    pub structure: IndexStructure,
}

/// A reader's view of one index: a pinned generation plus its structure.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: Arc<Generation>,
    pub structure: IndexStructure,
}

/// Build counters since the manager was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BuildCounters {
    pub completed: u64,
    pub failed: u64,
    pub commits: u64,
}

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Generation committed by the purge, if one ran.
    pub generation: Option<u64>,
    pub tombstones_removed: usize,
    pub generations_reclaimed: usize,
}

struct IndexState {
    name: String,
    dimension: usize,
    structure: IndexStructure,
    current: ArcSwap<Generation>,
    manifest: Mutex<IndexManifest>,
    phase: Mutex<BuildStatus>,
    degraded: AtomicBool,
    /// Generations replaced as current whose artifacts may still be on disk.
    superseded: Mutex<Vec<(u64, Weak<Generation>)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IndexState {
    fn new(manifest: IndexManifest, current: Generation, degraded: bool) -> Self {
        Self {
            name: manifest.name.clone(),
            dimension: manifest.dimension,
            structure: manifest.structure,
            current: ArcSwap::from_pointee(current),
            manifest: Mutex::new(manifest),
            phase: Mutex::new(BuildStatus::Idle),
            degraded: AtomicBool::new(degraded),
            superseded: Mutex::new(Vec::new()),
        }
    }

    fn set_phase(&self, phase: BuildStatus) {
        *lock(&self.phase) = phase;
    }

    fn status(&self) -> BuildStatus {
        match *lock(&self.phase) {
            BuildStatus::Idle if self.degraded.load(Ordering::SeqCst) => BuildStatus::Degraded,
            phase => phase,
        }
    }

    fn manifest(&self) -> IndexManifest {
        lock(&self.manifest).clone()
    }
}

/// Exclusive write access to one index. Released on drop.
struct Lease<'a> {
    leases: &'a Mutex<HashMap<String, Arc<AtomicBool>>>,
    name: String,
    cancelled: Arc<AtomicBool>,
    state: Option<Arc<IndexState>>,
}

impl Lease<'_> {
    fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(IndexError::Cancelled(self.name.clone()).into());
        }
        Ok(())
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(state) = &self.state {
            state.set_phase(BuildStatus::Idle);
        }
        lock(self.leases).remove(&self.name);
    }
}

/// Changes staged for the next generation of one index.
struct Staging {
    parent: Arc<Generation>,
    builder: GenerationBuilder,
    /// Chunks still needing a vector, with their document's content hash.
    pending: Vec<(Chunk, String)>,
    /// Records whose size or mtime changed but whose content did not.
    touched: Vec<DocumentRecord>,
    summary: BuildSummary,
    started: Instant,
}

impl Staging {
    fn new(state: &IndexState) -> Self {
        let parent = state.current.load_full();
        let next = state.manifest().next_generation();
        let builder = parent.builder(&state.name, next);
        Self {
            parent,
            builder,
            pending: Vec::new(),
            touched: Vec::new(),
            summary: BuildSummary::default(),
            started: Instant::now(),
        }
    }

    fn remove(&mut self, path: &str) -> bool {
        let removed = self.builder.remove_document(path).is_some();
        if removed {
            self.summary.removed += 1;
        }
        removed
    }
}

fn embedding_key(model: &str, chunk_hash: &str) -> String {
    format!("emb:{}:{}", model, chunk_hash)
}

pub struct IndexManager {
    parts: Collaborators,
    options: ManagerOptions,
    indexes: RwLock<HashMap<String, Arc<IndexState>>>,
    leases: Mutex<HashMap<String, Arc<AtomicBool>>>,
    completed: AtomicU64,
    failed: AtomicU64,
    commits: AtomicU64,
}

impl IndexManager {
    /// Open the manager and recover every index found in the store.
    pub async fn open(parts: Collaborators, options: ManagerOptions) -> Result<Self> {
        let manager = Self {
            parts,
            options,
            indexes: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        };
        let manifests = manager
            .io("list manifests", manager.parts.store.list_manifests())
            .await?;
        for manifest in manifests {
            let state = manager.recover(manifest).await?;
            manager
                .indexes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(state.name.clone(), Arc::new(state));
        }
        Ok(manager)
    }

    pub fn validator(&self) -> &Arc<PathValidator> {
        &self.parts.validator
    }

    pub fn counters(&self) -> BuildCounters {
        BuildCounters {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }

    async fn io<T>(&self, operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.options.io_timeout, fut)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                after: self.options.io_timeout,
            })?
    }

    /// Load the current generation of `manifest`, falling back through
    /// older retained generations when it fails verification.
    async fn recover(&self, mut manifest: IndexManifest) -> Result<IndexState> {
        if manifest.current_generation == 0 {
            let empty = Generation::empty(manifest.dimension);
            return Ok(IndexState::new(manifest, empty, false));
        }

        let mut candidates: Vec<GenerationInfo> = manifest
            .generations
            .iter()
            .filter(|g| g.id <= manifest.current_generation)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.id.cmp(&a.id));
        if candidates.first().map(|g| g.id) != Some(manifest.current_generation) {
            candidates.insert(
                0,
                GenerationInfo {
                    id: manifest.current_generation,
                    checksum: String::new(),
                    entries: 0,
                    committed_at: chrono::Utc::now(),
                },
            );
        }

        let mut corrupt = Vec::new();
        let mut loaded = None;
        for info in &candidates {
            let read = self
                .io("read generation", self.parts.store.read_generation(&manifest, info))
                .await;
            match read {
                Ok(g) => {
                    loaded = Some(g);
                    break;
                }
                Err(Error::Corruption(e)) => {
                    warn!(index = %manifest.name, generation = info.id, error = %e, "generation failed verification");
                    corrupt.push((info.id, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        if corrupt.is_empty() {
            let current = loaded.unwrap_or_else(|| Generation::empty(manifest.dimension));
            info!(index = %manifest.name, generation = current.id(), "index loaded");
            return Ok(IndexState::new(manifest, current, false));
        }

        let fallback = loaded.as_ref().map(|g| g.id());
        for (id, error) in &corrupt {
            self.parts.sink.emit(Event::CorruptionDetected {
                index: manifest.name.clone(),
                generation: *id,
                error: error.clone(),
                fallback,
            });
        }
        let bad: HashSet<u64> = corrupt.iter().map(|(id, _)| *id).collect();
        manifest.generations.retain(|g| !bad.contains(&g.id));
        manifest.current_generation = fallback.unwrap_or(0);
        if let Err(e) = self
            .io("write manifest", self.parts.store.write_manifest(&manifest))
            .await
        {
            warn!(index = %manifest.name, error = %e, "could not record fallback in manifest");
        }
        let current = loaded.unwrap_or_else(|| Generation::empty(manifest.dimension));
        Ok(IndexState::new(manifest, current, true))
    }

    fn state(&self, name: &str) -> Result<Arc<IndexState>> {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::IndexNotFound(name.to_string()).into())
    }

    fn acquire(&self, name: &str, state: Option<Arc<IndexState>>) -> Result<Lease<'_>> {
        let mut leases = lock(&self.leases);
        if leases.contains_key(name) {
            return Err(IndexError::BuildInProgress(name.to_string()).into());
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        leases.insert(name.to_string(), Arc::clone(&cancelled));
        if let Some(s) = &state {
            s.set_phase(BuildStatus::Building);
        }
        Ok(Lease {
            leases: &self.leases,
            name: name.to_string(),
            cancelled,
            state,
        })
    }

    /// Ask the running build on `name` to stop at its next checkpoint.
    /// Returns `false` when nothing is running.
    pub fn cancel(&self, name: &str) -> bool {
        match lock(&self.leases).get(name) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Create an index, or return the existing one if the dimension matches.
    pub async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        structure: IndexStructure,
    ) -> Result<IndexHandle> {
        validate_index_name(name)?;
        if dimension == 0 {
            return Err(Error::Config("index dimension must be > 0".to_string()));
        }
        let _lease = self.acquire(name, None)?;
        if let Ok(existing) = self.state(name) {
            if existing.dimension != dimension {
                return Err(IndexError::DimensionConflict {
                    index: name.to_string(),
                    expected: existing.dimension,
                    actual: dimension,
                }
                .into());
            }
            return Ok(IndexHandle {
                name: existing.name.clone(),
                dimension: existing.dimension,
                structure: existing.structure,
            });
        }

        let manifest = IndexManifest::new(name, dimension, structure);
        self.io("write manifest", self.parts.store.write_manifest(&manifest))
            .await?;
        let state = IndexState::new(manifest, Generation::empty(dimension), false);
        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(state));
        info!(index = name, dimension, "index created");
        Ok(IndexHandle {
            name: name.to_string(),
            dimension,
            structure,
        })
    }

    /// Current generation and structure of `name`, for readers.
    pub fn snapshot(&self, name: &str) -> Result<Snapshot> {
        let state = self.state(name)?;
        Ok(Snapshot {
            generation: state.current.load_full(),
            structure: state.structure,
        })
    }

    pub fn stats(&self, name: &str) -> Result<IndexStats> {
        let state = self.state(name)?;
        let generation = state.current.load_full();
        let retained = lock(&state.manifest).generations.len();
        Ok(IndexStats {
            name: state.name.clone(),
            dimension: state.dimension,
            structure: state.structure,
            generation: generation.id(),
            status: state.status(),
            documents: generation.document_count(),
            live_entries: generation.live_count(),
            tombstones: generation.tombstone_count(),
            retained_generations: retained,
        })
    }

    /// Statistics for every index, ordered by name.
    pub fn list(&self) -> Vec<IndexStats> {
        let mut names: Vec<String> = self
            .indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names.iter().filter_map(|n| self.stats(n).ok()).collect()
    }

    /// Canonical key of a document path. Missing files inside the
    /// whitelist still resolve, so deleted documents can be addressed.
    fn document_key(&self, path: &Path) -> Result<String> {
        match self.parts.validator.authorize(path) {
            Decision::Allowed(p) => Ok(p.key()),
            Decision::Denied(DenialReason::NotFound) => {
                Ok(canonicalize_lenient(path)?.to_string_lossy().into_owned())
            }
            Decision::Denied(reason) => Err(Error::Authorization {
                path: path.display().to_string(),
                reason,
            }),
        }
    }

    /// Documents of the current generation, ordered by path.
    pub fn list_documents(&self, name: &str) -> Result<Vec<DocumentInfo>> {
        let generation = self.state(name)?.current.load_full();
        Ok(generation
            .documents()
            .map(|d| DocumentInfo {
                path: d.path.clone(),
                format: d.format,
                size: d.size,
                modified_at: d.modified_at,
                content_hash: d.content_hash.clone(),
                chunks: d.chunk_ids.len(),
                exists: matches!(
                    self.parts.validator.authorize(Path::new(&d.path)),
                    Decision::Allowed(_)
                ),
            })
            .collect())
    }

    /// The current record for one document, if it is indexed.
    pub fn document_info(&self, name: &str, path: &Path) -> Result<Option<DocumentRecord>> {
        let generation = self.state(name)?.current.load_full();
        let key = self.document_key(path)?;
        Ok(generation.document(&key).cloned())
    }

    /// Indexed documents whose file is gone, no longer allowed, or whose
    /// bytes hash differently from the indexed content.
    pub async fn find_outdated(&self, name: &str) -> Result<Vec<OutdatedDocument>> {
        let generation = self.state(name)?.current.load_full();
        let mut outdated = Vec::new();
        for record in generation.documents() {
            let staleness = match self.parts.validator.authorize(Path::new(&record.path)) {
                Decision::Denied(DenialReason::NotFound) => Some(Staleness::Missing),
                Decision::Denied(reason) => Some(Staleness::Denied { reason }),
                Decision::Allowed(path) => match self.parts.loader.describe(&path).await {
                    Err(reason) => Some(Staleness::Unreadable {
                        error: reason.to_string(),
                    }),
                    Ok(meta) => match self.parts.loader.fingerprint(&meta).await {
                        Ok(hash) if hash == record.content_hash => None,
                        Ok(_) => Some(Staleness::Changed),
                        Err(e) => Some(Staleness::Unreadable {
                            error: e.to_string(),
                        }),
                    },
                },
            };
            if let Some(staleness) = staleness {
                outdated.push(OutdatedDocument {
                    path: record.path.clone(),
                    staleness,
                });
            }
        }
        Ok(outdated)
    }

    /// Emit start/finish events around one write operation.
    async fn tracked(
        &self,
        name: &str,
        root: Option<String>,
        fut: impl Future<Output = Result<BuildSummary>>,
    ) -> Result<BuildSummary> {
        let build_id = Uuid::new_v4().to_string();
        self.parts.sink.emit(Event::BuildStarted {
            index: name.to_string(),
            build_id: build_id.clone(),
            root,
        });
        match fut.await {
            Ok(summary) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.parts.sink.emit(Event::BuildCompleted {
                    index: name.to_string(),
                    build_id,
                    summary: summary.clone(),
                });
                Ok(summary)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.parts.sink.emit(Event::BuildFailed {
                    index: name.to_string(),
                    build_id,
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn check_embedder(&self, state: &IndexState) -> Result<()> {
        let dims = self.parts.embedder.dims();
        if dims != state.dimension {
            return Err(IndexError::DimensionConflict {
                index: state.name.clone(),
                expected: state.dimension,
                actual: dims,
            }
            .into());
        }
        Ok(())
    }

    /// Index everything under `root`, tombstoning documents that are gone.
    pub async fn build_full(&self, name: &str, root: &Path) -> Result<BuildSummary> {
        let state = self.state(name)?;
        let root = self.parts.validator.require(root)?;
        let lease = self.acquire(name, Some(Arc::clone(&state)))?;
        self.tracked(name, Some(root.key()), self.run_full(&state, &lease, &root))
            .await
    }

    async fn run_full(
        &self,
        state: &IndexState,
        lease: &Lease<'_>,
        root: &AuthorizedPath,
    ) -> Result<BuildSummary> {
        self.check_embedder(state)?;
        let mut staging = Staging::new(state);
        let listing = self.parts.loader.list(root, &self.parts.validator).await?;
        for s in &listing.skipped {
            debug!(index = %state.name, path = %s.path, reason = %s.reason, "skipped");
        }
        staging.summary.skipped += listing.skipped.len();

        let mut seen = HashSet::new();
        for meta in &listing.documents {
            lease.check()?;
            if self.stage_file(&mut staging, meta).await? {
                seen.insert(meta.path.key());
            }
        }

        for path in staging.builder.document_paths() {
            if !seen.contains(&path) && Path::new(&path).starts_with(root.as_path()) {
                staging.remove(&path);
            }
        }

        self.finish(state, lease, staging).await
    }

    /// Re-index (or drop) a single document.
    pub async fn update_document(&self, name: &str, path: &Path) -> Result<BuildSummary> {
        let state = self.state(name)?;
        let lease = self.acquire(name, Some(Arc::clone(&state)))?;
        let root = Some(path.display().to_string());
        self.tracked(name, root, self.run_update(&state, &lease, path))
            .await
    }

    async fn run_update(&self, state: &IndexState, lease: &Lease<'_>, path: &Path) -> Result<BuildSummary> {
        let mut staging = Staging::new(state);
        match self.parts.validator.authorize(path) {
            Decision::Allowed(authorized) => match self.parts.loader.describe(&authorized).await {
                Ok(meta) => {
                    self.check_embedder(state)?;
                    if !self.stage_file(&mut staging, &meta).await? {
                        staging.remove(&authorized.key());
                    }
                }
                Err(reason) => {
                    debug!(index = %state.name, path = %authorized, reason = %reason, "skipped");
                    staging.summary.skipped += 1;
                    staging.remove(&authorized.key());
                }
            },
            // Inside the whitelist but deleted: drop what we have for it.
            Decision::Denied(DenialReason::NotFound) => {
                let key = canonicalize_lenient(path)?.to_string_lossy().into_owned();
                if !staging.remove(&key) {
                    return Err(Error::Authorization {
                        path: path.display().to_string(),
                        reason: DenialReason::NotFound,
                    });
                }
            }
            Decision::Denied(reason) => {
                return Err(Error::Authorization {
                    path: path.display().to_string(),
                    reason,
                })
            }
        }
        self.finish(state, lease, staging).await
    }

    /// Stage explicit chunks, replacing the named documents' previous
    /// chunks. Chunks that already carry a vector are not re-embedded.
    pub async fn upsert(&self, name: &str, chunks: Vec<Chunk>) -> Result<BuildSummary> {
        let state = self.state(name)?;

        // Authorize every document before staging anything.
        let mut by_doc: Vec<(AuthorizedPath, Vec<Chunk>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for chunk in chunks {
            let slot = match positions.get(&chunk.document_path) {
                Some(i) => *i,
                None => {
                    let authorized = self
                        .parts
                        .validator
                        .require(Path::new(&chunk.document_path))?;
                    positions.insert(chunk.document_path.clone(), by_doc.len());
                    by_doc.push((authorized, Vec::new()));
                    by_doc.len() - 1
                }
            };
            by_doc[slot].1.push(chunk);
        }

        let lease = self.acquire(name, Some(Arc::clone(&state)))?;
        self.tracked(name, None, self.run_upsert(&state, &lease, by_doc))
            .await
    }

    async fn run_upsert(
        &self,
        state: &IndexState,
        lease: &Lease<'_>,
        docs: Vec<(AuthorizedPath, Vec<Chunk>)>,
    ) -> Result<BuildSummary> {
        let mut staging = Staging::new(state);
        for (path, mut chunks) in docs {
            lease.check()?;
            chunks.sort_by_key(|c| c.ordinal);
            let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
            let record = DocumentRecord {
                path: path.key(),
                format: path
                    .as_path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(DocumentFormat::from_extension)
                    .unwrap_or(DocumentFormat::Text),
                size: chunks.iter().map(|c| c.text.len() as u64).sum(),
                modified_at: chrono::Utc::now().timestamp(),
                content_hash: content_hash(ids.join("\n").as_bytes()),
                chunk_ids: Vec::new(),
            };
            self.stage_document(&mut staging, record, chunks)?;
        }
        self.finish(state, lease, staging).await
    }

    /// Drop documents from the index without touching the files. Paths
    /// that are not indexed are counted as skipped. An exact indexed key is
    /// accepted as is, so documents the current policy denies can still be
    /// dropped.
    pub async fn remove_documents(&self, name: &str, paths: &[PathBuf]) -> Result<BuildSummary> {
        let state = self.state(name)?;
        let current = state.current.load_full();
        let keys = paths
            .iter()
            .map(|p| {
                let literal = p.to_string_lossy();
                if current.document(&literal).is_some() {
                    Ok(literal.into_owned())
                } else {
                    self.document_key(p)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        drop(current);
        let lease = self.acquire(name, Some(Arc::clone(&state)))?;
        self.tracked(name, None, self.run_remove(&state, &lease, keys))
            .await
    }

    async fn run_remove(
        &self,
        state: &IndexState,
        lease: &Lease<'_>,
        keys: Vec<String>,
    ) -> Result<BuildSummary> {
        let mut staging = Staging::new(state);
        for key in keys {
            lease.check()?;
            let hash = staging.builder.document(&key).map(|d| d.content_hash.clone());
            match hash {
                Some(hash) => {
                    self.parts.embeddings.invalidate_tag(&hash);
                    staging.remove(&key);
                }
                None => staging.summary.skipped += 1,
            }
        }
        self.finish(state, lease, staging).await
    }

    /// Hash one listed file and stage it if its content changed. Returns
    /// `false` when the file could not be read, so callers can drop stale
    /// entries.
    async fn stage_file(&self, staging: &mut Staging, meta: &DocumentMeta) -> Result<bool> {
        let key = meta.path.key();
        if let Some(prior) = staging.parent.document(&key) {
            let hash = match self.parts.loader.fingerprint(meta).await {
                Ok(h) => h,
                Err(e @ (Error::Parse { .. } | Error::Io(_))) => {
                    warn!(path = %key, error = %e, "document skipped");
                    staging.summary.skipped += 1;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            if prior.content_hash == hash {
                if prior.size != meta.size || prior.modified_at != meta.modified_at {
                    let mut touched = prior.clone();
                    touched.size = meta.size;
                    touched.modified_at = meta.modified_at;
                    staging.touched.push(touched);
                }
                staging.summary.skipped += 1;
                return Ok(true);
            }
        }

        let loaded = match self.parts.loader.load(meta).await {
            Ok(l) => l,
            Err(e @ (Error::Parse { .. } | Error::Io(_))) => {
                warn!(path = %key, error = %e, "document skipped");
                staging.summary.skipped += 1;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let record = DocumentRecord {
            path: key,
            format: meta.format,
            size: meta.size,
            modified_at: meta.modified_at,
            content_hash: loaded.content_hash,
            chunk_ids: Vec::new(),
        };
        self.stage_document(staging, record, loaded.chunks)?;
        Ok(true)
    }

    /// Replace a document's entries with `chunks`. Unchanged content is a no-op.
    fn stage_document(
        &self,
        staging: &mut Staging,
        record: DocumentRecord,
        chunks: Vec<Chunk>,
    ) -> Result<()> {
        let prior = staging.builder.document(&record.path).cloned();
        match &prior {
            Some(p) if p.content_hash == record.content_hash => {
                staging.summary.skipped += 1;
                return Ok(());
            }
            Some(p) => {
                // Nothing derived from the old content may be served again.
                self.parts.embeddings.invalidate_tag(&p.content_hash);
                staging.builder.remove_document(&p.path);
                staging.summary.updated += 1;
            }
            None => staging.summary.added += 1,
        }

        let model = self.parts.embedder.model_name();
        let mut ids = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            chunk.document_path = record.path.clone();
            ids.push(chunk.id.clone());
            let reused = chunk
                .vector
                .take()
                .or_else(|| {
                    staging
                        .parent
                        .entry(&chunk.id)
                        .filter(|e| e.content_hash == chunk.content_hash)
                        .map(|e| e.vector.clone())
                })
                .or_else(|| {
                    self.parts
                        .embeddings
                        .get(&embedding_key(model, &chunk.content_hash))
                });
            match reused {
                Some(vector) => staging
                    .builder
                    .insert_entry(IndexEntry::from_chunk(chunk, vector))?,
                None => staging.pending.push((chunk, record.content_hash.clone())),
            }
        }
        staging.builder.put_document(DocumentRecord {
            chunk_ids: ids,
            ..record
        });
        Ok(())
    }

    /// Embed whatever is pending, then commit if anything changed.
    async fn finish(
        &self,
        state: &IndexState,
        lease: &Lease<'_>,
        mut staging: Staging,
    ) -> Result<BuildSummary> {
        self.embed_pending(state, lease, &mut staging).await?;
        lease.check()?;

        if staging.builder.is_dirty() {
            for record in std::mem::take(&mut staging.touched) {
                staging.builder.put_document(record);
            }
            let id = self.commit(state, staging.builder.build()).await?;
            staging.summary.generation = Some(id);
        }
        staging.summary.duration_ms = staging.started.elapsed().as_millis() as u64;
        Ok(staging.summary)
    }

    async fn embed_pending(
        &self,
        state: &IndexState,
        lease: &Lease<'_>,
        staging: &mut Staging,
    ) -> Result<()> {
        let model = self.parts.embedder.model_name().to_string();
        let pending = std::mem::take(&mut staging.pending);
        let mut batches = pending.into_iter().peekable();

        while batches.peek().is_some() {
            lease.check()?;
            let batch: Vec<(Chunk, String)> = batches.by_ref().take(self.options.batch_size).collect();
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let ids: Vec<String> = batch.iter().map(|(c, _)| c.id.clone()).collect();
            let embedder = &self.parts.embedder;

            let vectors = self
                .options
                .retry
                .run(
                    &ids,
                    || embedder.embed(&texts),
                    |attempt, delay, err| {
                        self.parts.sink.emit(Event::EmbeddingRetry {
                            index: state.name.clone(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            reason: err.to_string(),
                        })
                    },
                )
                .await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::Aborted {
                    failed_chunks: ids,
                    reason: format!("provider returned {} vectors for {} texts", vectors.len(), batch.len()),
                }
                .into());
            }
            lease.check()?;

            for ((chunk, doc_hash), vector) in batch.into_iter().zip(vectors) {
                let key = embedding_key(&model, &chunk.content_hash);
                staging
                    .builder
                    .insert_entry(IndexEntry::from_chunk(chunk, vector.clone()))?;
                self.parts.embeddings.insert(&key, vector, &[doc_hash]);
                staging.summary.chunks_embedded += 1;
            }
        }
        Ok(())
    }

    /// Make `generation` durable and current. The swap happens only after
    /// both the artifact and the manifest are written.
    async fn commit(&self, state: &IndexState, generation: Generation) -> Result<u64> {
        state.set_phase(BuildStatus::Committing);
        let id = generation.id();
        let store = &self.parts.store;

        if let Err(e) = self
            .io("write generation", store.write_generation(&state.name, &generation))
            .await
        {
            self.discard_artifact(state, id).await;
            return Err(e);
        }

        let mut manifest = state.manifest();
        manifest.commit(GenerationInfo::of(&generation));
        let keep = self.options.retain_generations + 1;
        if manifest.generations.len() > keep {
            let excess = manifest.generations.len() - keep;
            manifest.generations.drain(..excess);
        }
        if let Err(e) = self.io("write manifest", store.write_manifest(&manifest)).await {
            self.discard_artifact(state, id).await;
            return Err(e);
        }

        let live_entries = generation.live_count();
        let tombstones = generation.tombstone_count();
        *lock(&state.manifest) = manifest;
        let previous = state.current.swap(Arc::new(generation));
        state.degraded.store(false, Ordering::SeqCst);
        self.commits.fetch_add(1, Ordering::Relaxed);
        if previous.id() != 0 {
            lock(&state.superseded).push((previous.id(), Arc::downgrade(&previous)));
        }

        self.parts.sink.emit(Event::GenerationCommitted {
            index: state.name.clone(),
            generation: id,
            live_entries,
            tombstones,
        });
        Ok(id)
    }

    /// Best-effort removal of an artifact whose commit failed.
    async fn discard_artifact(&self, state: &IndexState, id: u64) {
        if let Err(e) = self.parts.store.delete_generation(&state.name, id).await {
            warn!(index = %state.name, generation = id, error = %e, "could not remove uncommitted generation");
        }
    }

    /// Purge tombstones when over the configured ratio (or when `force`),
    /// then delete superseded artifacts no reader still holds.
    pub async fn compact(&self, name: &str, force: bool) -> Result<CompactionReport> {
        let state = self.state(name)?;
        let lease = self.acquire(name, Some(Arc::clone(&state)))?;
        let mut report = CompactionReport::default();

        let current = state.current.load_full();
        let due = current.tombstone_count() > 0
            && (force || current.tombstone_ratio() >= self.options.tombstone_ratio);
        if due {
            let mut builder = current.builder(name, state.manifest().next_generation());
            report.tombstones_removed = builder.purge_tombstones();
            lease.check()?;
            report.generation = Some(self.commit(&state, builder.build()).await?);
        }
        drop(current);

        report.generations_reclaimed = self.reclaim(&state).await?;
        drop(lease);

        if report.generation.is_some() || report.generations_reclaimed > 0 {
            self.parts.sink.emit(Event::Compacted {
                index: name.to_string(),
                generation: report.generation,
                tombstones_removed: report.tombstones_removed,
                generations_reclaimed: report.generations_reclaimed,
            });
        }
        Ok(report)
    }

    /// Delete artifacts of superseded generations that fell out of the
    /// retention window and have no remaining readers.
    async fn reclaim(&self, state: &IndexState) -> Result<usize> {
        let retained: HashSet<u64> = lock(&state.manifest)
            .generations
            .iter()
            .map(|g| g.id)
            .collect();
        let reclaimable: Vec<u64> = {
            let mut superseded = lock(&state.superseded);
            let mut out = Vec::new();
            superseded.retain(|(id, weak)| {
                if retained.contains(id) || weak.strong_count() > 0 {
                    true
                } else {
                    out.push(*id);
                    false
                }
            });
            out
        };
        for id in &reclaimable {
            self.io(
                "delete generation",
                self.parts.store.delete_generation(&state.name, *id),
            )
            .await?;
            debug!(index = %state.name, generation = id, "generation reclaimed");
        }
        Ok(reclaimable.len())
    }

    /// Run [`compact`](Self::compact) over every index on a fixed interval.
    pub fn spawn_compaction(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                for stats in manager.list() {
                    match manager.compact(&stats.name, false).await {
                        Ok(_) | Err(Error::Index(IndexError::BuildInProgress(_))) => {}
                        Err(e) => warn!(index = %stats.name, error = %e, "compaction failed"),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::loader::FsLoader;
    use crate::policy::{AccessPolicy, AllowedDirectory};
    use docfence_core::chunk::chunk_text;
    use docfence_core::events::NullSink;
    use docfence_core::store::memory::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn options() -> ManagerOptions {
        ManagerOptions {
            batch_size: 2,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                call_timeout: Duration::from_secs(5),
            },
            retain_generations: 1,
            io_timeout: Duration::from_secs(5),
            tombstone_ratio: 0.2,
        }
    }

    async fn manager(root: &Path, store: Arc<MemoryStore>) -> IndexManager {
        manager_with(root, store).await
    }

    async fn manager_with(root: &Path, store: Arc<dyn GenerationStore>) -> IndexManager {
        let policy =
            AccessPolicy::new(vec![AllowedDirectory::new(root, &[".*".to_string()]).unwrap()])
                .unwrap();
        let parts = Collaborators {
            store,
            embedder: Arc::new(HashProvider::new(16)),
            loader: Arc::new(FsLoader::new(1 << 20, 50)),
            validator: Arc::new(PathValidator::new(policy, Arc::new(NullSink))),
            embeddings: Arc::new(Cache::new(
                Duration::from_secs(60),
                1000,
                Duration::from_secs(5),
            )),
            sink: Arc::new(NullSink),
        };
        IndexManager::open(parts, options()).await.unwrap()
    }

    /// Delegates to a [`MemoryStore`]; once `fail` is set, manifest writes
    /// and artifact deletes both error.
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryStore,
        fail: AtomicBool,
        deletes: AtomicU64,
    }

    #[async_trait::async_trait]
    impl GenerationStore for FailingStore {
        async fn list_manifests(&self) -> Result<Vec<IndexManifest>> {
            self.inner.list_manifests().await
        }

        async fn read_manifest(&self, index: &str) -> Result<Option<IndexManifest>> {
            self.inner.read_manifest(index).await
        }

        async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            self.inner.write_manifest(manifest).await
        }

        async fn write_generation(&self, index: &str, generation: &Generation) -> Result<()> {
            self.inner.write_generation(index, generation).await
        }

        async fn read_generation(
            &self,
            manifest: &IndexManifest,
            info: &GenerationInfo,
        ) -> Result<Generation> {
            self.inner.read_generation(manifest, info).await
        }

        async fn delete_generation(&self, index: &str, id: u64) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::other("read-only")));
            }
            self.inner.delete_generation(index, id).await
        }
    }

    #[tokio::test]
    async fn unknown_index_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let m = manager(tmp.path(), Arc::new(MemoryStore::new())).await;
        let err = m.build_full("nope", tmp.path()).await.unwrap_err();
        assert!(matches!(err, Error::Index(IndexError::IndexNotFound(_))));
        assert!(m.snapshot("nope").is_err());
    }

    #[tokio::test]
    async fn create_is_idempotent_but_rejects_other_dimensions() {
        let tmp = TempDir::new().unwrap();
        let m = manager(tmp.path(), Arc::new(MemoryStore::new())).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();
        let again = m.create_index("docs", 16, IndexStructure::default()).await.unwrap();
        assert_eq!(again.dimension, 16);
        let err = m
            .create_index("docs", 8, IndexStructure::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index(IndexError::DimensionConflict { .. })));
        let err = m
            .create_index("../x", 16, IndexStructure::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index(IndexError::InvalidName(_))));
    }

    #[tokio::test]
    async fn rebuild_tracks_additions_updates_and_removals() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha document").unwrap();
        fs::write(tmp.path().join("b.txt"), "beta document").unwrap();
        let store = Arc::new(MemoryStore::new());
        let m = manager(tmp.path(), Arc::clone(&store)).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();

        let s1 = m.build_full("docs", tmp.path()).await.unwrap();
        assert_eq!((s1.added, s1.updated, s1.removed), (2, 0, 0));
        assert_eq!(s1.generation, Some(1));

        fs::write(tmp.path().join("a.txt"), "alpha document, revised and longer").unwrap();
        fs::remove_file(tmp.path().join("b.txt")).unwrap();
        let s2 = m.build_full("docs", tmp.path()).await.unwrap();
        assert_eq!((s2.added, s2.updated, s2.removed), (0, 1, 1));
        assert_eq!(s2.generation, Some(2));

        let snap = m.snapshot("docs").unwrap();
        assert_eq!(snap.generation.document_count(), 1);
        assert!(snap.generation.tombstone_count() > 0);
    }

    #[tokio::test]
    async fn compaction_purges_tombstones_and_reclaims_artifacts() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        let store = Arc::new(MemoryStore::new());
        let m = manager(tmp.path(), Arc::clone(&store)).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();
        m.build_full("docs", tmp.path()).await.unwrap();
        fs::remove_file(tmp.path().join("b.txt")).unwrap();
        m.build_full("docs", tmp.path()).await.unwrap();

        let report = m.compact("docs", false).await.unwrap();
        assert_eq!(report.tombstones_removed, 1);
        assert_eq!(report.generation, Some(3));
        // Generation 1 fell out of the retention window (current + 1 retained).
        assert_eq!(report.generations_reclaimed, 1);
        assert_eq!(store.generation_count("docs"), 2);
        assert_eq!(m.stats("docs").unwrap().tombstones, 0);

        let idle = m.compact("docs", false).await.unwrap();
        assert_eq!(idle, CompactionReport::default());
    }

    #[tokio::test]
    async fn upsert_of_explicit_chunks_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let doc = tmp.path().join("notes.md");
        fs::write(&doc, "placeholder").unwrap();
        let m = manager(tmp.path(), Arc::new(MemoryStore::new())).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();

        let key = m.validator().require(&doc).unwrap().key();
        let chunks = chunk_text(&key, "Ownership.\n\nBorrowing.", 3);
        let first = m.upsert("docs", chunks.clone()).await.unwrap();
        assert_eq!(first.added, 1);
        assert!(first.generation.is_some());

        let second = m.upsert("docs", chunks).await.unwrap();
        assert_eq!(second.generation, None);
        assert_eq!(second.chunks_embedded, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn update_document_drops_deleted_files() {
        let tmp = TempDir::new().unwrap();
        let doc = tmp.path().join("a.txt");
        fs::write(&doc, "alpha").unwrap();
        let m = manager(tmp.path(), Arc::new(MemoryStore::new())).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();
        let s = m.update_document("docs", &doc).await.unwrap();
        assert_eq!(s.added, 1);

        fs::remove_file(&doc).unwrap();
        let s = m.update_document("docs", &doc).await.unwrap();
        assert_eq!(s.removed, 1);
        assert_eq!(m.stats("docs").unwrap().documents, 0);

        let err = m.update_document("docs", &doc).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Authorization {
                reason: DenialReason::NotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_commit_keeps_generation_and_reports_original_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        let store = Arc::new(FailingStore::default());
        let m = manager_with(tmp.path(), store.clone()).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();
        m.build_full("docs", tmp.path()).await.unwrap();

        fs::write(tmp.path().join("a.txt"), "alpha, revised").unwrap();
        store.fail.store(true, Ordering::SeqCst);
        let err = m.build_full("docs", tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("disk full"), "{err}");
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(m.snapshot("docs").unwrap().generation.id(), 1);
        assert_eq!(m.stats("docs").unwrap().retained_generations, 1);

        store.fail.store(false, Ordering::SeqCst);
        let summary = m.build_full("docs", tmp.path()).await.unwrap();
        assert_eq!(summary.generation, Some(2));
        assert_eq!(store.inner.generation_count("docs"), 2);
    }

    #[tokio::test]
    async fn same_length_edit_with_preserved_mtime_is_reindexed() {
        let tmp = TempDir::new().unwrap();
        let doc = tmp.path().join("a.txt");
        fs::write(&doc, "alpha bravo").unwrap();
        let m = manager(tmp.path(), Arc::new(MemoryStore::new())).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();
        m.build_full("docs", tmp.path()).await.unwrap();
        let mtime = fs::metadata(&doc).unwrap().modified().unwrap();

        fs::write(&doc, "zulu yankee").unwrap();
        fs::File::options()
            .write(true)
            .open(&doc)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        let s = m.build_full("docs", tmp.path()).await.unwrap();
        assert_eq!((s.added, s.updated, s.skipped), (0, 1, 0));
        assert_eq!(s.generation, Some(2));

        let snap = m.snapshot("docs").unwrap();
        let texts: Vec<&str> = snap.generation.live_entries().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["zulu yankee"]);
    }

    #[tokio::test]
    async fn documents_are_listed_checked_and_removed() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        fs::write(&a, "alpha document").unwrap();
        fs::write(&b, "beta document").unwrap();
        let m = manager(tmp.path(), Arc::new(MemoryStore::new())).await;
        m.create_index("docs", 16, IndexStructure::default()).await.unwrap();
        m.build_full("docs", tmp.path()).await.unwrap();

        let docs = m.list_documents("docs").unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.exists && d.chunks == 1));
        assert!(m.find_outdated("docs").await.unwrap().is_empty());

        fs::write(&a, "alpha document, edited").unwrap();
        fs::remove_file(&b).unwrap();
        let outdated: Vec<Staleness> = m
            .find_outdated("docs")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.staleness)
            .collect();
        assert_eq!(outdated, vec![Staleness::Changed, Staleness::Missing]);
        let docs = m.list_documents("docs").unwrap();
        assert!(docs[0].exists);
        assert!(!docs[1].exists);

        let record = m.document_info("docs", &a).unwrap().unwrap();
        assert_eq!(record.chunk_ids.len(), 1);

        let s = m
            .remove_documents("docs", &[a.clone(), b.clone(), tmp.path().join("never.txt")])
            .await
            .unwrap();
        assert_eq!((s.removed, s.skipped), (2, 1));
        assert_eq!(s.generation, Some(2));
        assert!(a.exists());
        assert_eq!(m.stats("docs").unwrap().documents, 0);
        assert!(m.document_info("docs", &a).unwrap().is_none());

        let again = m.remove_documents("docs", &[a.clone()]).await.unwrap();
        assert_eq!(again.generation, None);

        // A document the policy has since started denying can still be dropped.
        let c = tmp.path().join("c.txt");
        fs::write(&c, "gamma document").unwrap();
        m.update_document("docs", &c).await.unwrap();
        let key = m.document_info("docs", &c).unwrap().unwrap().path;
        let strict = AccessPolicy::new(vec![AllowedDirectory::new(
            tmp.path(),
            &[".*".to_string(), "c.txt".to_string()],
        )
        .unwrap()])
        .unwrap();
        m.validator().replace_policy(strict);
        let outdated = m.find_outdated("docs").await.unwrap();
        assert_eq!(
            outdated[0].staleness,
            Staleness::Denied {
                reason: DenialReason::DeniedPattern
            }
        );
        let s = m.remove_documents("docs", &[PathBuf::from(&key)]).await.unwrap();
        assert_eq!(s.removed, 1);

        let err = m
            .remove_documents("docs", &[PathBuf::from("/etc/passwd")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Authorization {
                reason: DenialReason::OutsideWhitelist,
                ..
            }
        ));
    }
}
