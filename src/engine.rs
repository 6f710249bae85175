//! Query execution against pinned generations.
//!
//! A query captures the index's current generation once, at the start, and
//! ranks against that snapshot only. Builds committing meanwhile are never
//! observed mid-query.
//!
//! Two caches sit in front of the ranker:
//!
//! - **Query embeddings**, shared with the index manager's chunk cache and
//!   computed single-flight, so N concurrent identical semantic queries make
//!   one provider call.
//! - **Results**, keyed by index, generation, mode, `k`, `α` and query text.
//!   Including the generation id means a commit can never surface stale
//!   results; old keys simply age out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use docfence_core::embedding::EmbeddingProvider;
use docfence_core::events::{Event, ObservabilitySink};
use docfence_core::models::{SearchHit, SearchMode};
use docfence_core::search::{rank, RankParams, RankRequest};
use docfence_core::{EmbeddingError, Error, IndexError, Result};

use crate::cache::Cache;
use crate::config::Config;
use crate::manager::IndexManager;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub default_k: usize,
    pub max_k: usize,
    /// Ranking defaults; the metric is replaced by the index's own.
    pub rank: RankParams,
    pub retry: RetryPolicy,
    pub query_ttl: Duration,
    pub embedding_ttl: Duration,
    pub max_cached_results: usize,
    pub cache_wait: Duration,
}

impl SearchOptions {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.retrieval;
        Self {
            default_k: r.default_k,
            max_k: r.max_k,
            rank: RankParams {
                alpha: r.hybrid_alpha,
                candidate_k: r.candidate_k,
                min_score: r.min_score,
                max_per_document: r.max_chunks_per_document,
                metric: config.index.metric,
            },
            retry: RetryPolicy::from_config(&config.embedding),
            query_ttl: Duration::from_secs(config.cache.query_ttl_secs),
            embedding_ttl: Duration::from_secs(config.cache.embedding_ttl_secs),
            max_cached_results: config.cache.max_entries,
            cache_wait: Duration::from_secs(config.cache.wait_timeout_secs),
        }
    }
}

/// One search call.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub index: String,
    pub query: String,
    /// Defaults to the configured `default_k`; capped at `max_k`.
    pub k: Option<usize>,
    pub mode: SearchMode,
    /// Overrides the configured hybrid weight.
    pub alpha: Option<f64>,
}

impl SearchRequest {
    pub fn new(index: &str, query: &str, mode: SearchMode) -> Self {
        Self {
            index: index.to_string(),
            query: query.to_string(),
            k: None,
            mode,
            alpha: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Generation the query ran against.
    pub generation: u64,
    pub hits: Vec<SearchHit>,
    /// Served from the result cache.
    pub cached: bool,
}

/// Query counters since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryCounters {
    pub completed: u64,
    pub failed: u64,
    pub cached: u64,
}

pub struct SearchEngine {
    manager: Arc<IndexManager>,
    embedder: Arc<dyn EmbeddingProvider>,
    embeddings: Arc<Cache<Vec<f32>>>,
    results: Cache<Arc<Vec<SearchHit>>>,
    sink: Arc<dyn ObservabilitySink>,
    options: SearchOptions,
    completed: AtomicU64,
    failed: AtomicU64,
    cached: AtomicU64,
}

impl SearchEngine {
    pub fn new(
        manager: Arc<IndexManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        embeddings: Arc<Cache<Vec<f32>>>,
        sink: Arc<dyn ObservabilitySink>,
        options: SearchOptions,
    ) -> Self {
        let results = Cache::new(options.query_ttl, options.max_cached_results, options.cache_wait);
        Self {
            manager,
            embedder,
            embeddings,
            results,
            sink,
            options,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cached: AtomicU64::new(0),
        }
    }

    pub fn counters(&self) -> QueryCounters {
        QueryCounters {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
        }
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    /// Top `k` hits for `text` in `index`.
    pub async fn query(
        &self,
        index: &str,
        text: &str,
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<SearchHit>> {
        let req = SearchRequest::new(index, text, mode).with_k(k);
        Ok(self.search(&req).await?.hits)
    }

    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let k = req.k.unwrap_or(self.options.default_k).min(self.options.max_k);
        let result = self.execute(req, k).await;
        match &result {
            Ok(resp) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                if resp.cached {
                    self.cached.fetch_add(1, Ordering::Relaxed);
                }
                self.sink.emit(Event::QueryCompleted {
                    index: req.index.clone(),
                    mode: req.mode,
                    k,
                    hits: resp.hits.len(),
                    generation: resp.generation,
                    latency_ms: started.elapsed().as_millis() as u64,
                    cached: resp.cached,
                })
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.sink.emit(Event::QueryFailed {
                    index: req.index.clone(),
                    mode: req.mode,
                    error: e.to_string(),
                })
            }
        }
        result
    }

    async fn execute(&self, req: &SearchRequest, k: usize) -> Result<SearchResponse> {
        let alpha = match req.alpha {
            Some(a) if !(0.0..=1.0).contains(&a) => {
                return Err(IndexError::InvalidQuery(format!("alpha {} is outside [0, 1]", a)).into())
            }
            Some(a) => a,
            None => self.options.rank.alpha,
        };

        let snapshot = self.manager.snapshot(&req.index)?;
        let generation = snapshot.generation;
        let empty = SearchResponse {
            generation: generation.id(),
            hits: Vec::new(),
            cached: false,
        };
        if k == 0 || req.query.trim().is_empty() || generation.live_count() == 0 {
            return Ok(empty);
        }

        let key = format!(
            "{}\u{0}{}\u{0}{}\u{0}{}\u{0}{}\u{0}{}",
            req.index,
            generation.id(),
            req.mode,
            k,
            alpha.to_bits(),
            req.query
        );
        let params = RankParams {
            alpha,
            metric: snapshot.structure.metric,
            ..self.options.rank.clone()
        };
        let (hits, cached) = self
            .results
            .get_or_compute(&key, &[], self.options.query_ttl, || async {
                let query_vec = match req.mode {
                    SearchMode::Keyword => None,
                    SearchMode::Semantic | SearchMode::Hybrid => {
                        Some(self.query_vector(&req.index, &req.query, generation.dimension()).await?)
                    }
                };
                let ranked = rank(
                    &generation,
                    &RankRequest {
                        query: &req.query,
                        query_vec: query_vec.as_deref(),
                        mode: req.mode,
                        k,
                        params,
                    },
                );
                Ok(Arc::new(ranked))
            })
            .await?;

        Ok(SearchResponse {
            hits: hits.as_ref().clone(),
            cached,
            ..empty
        })
    }

    async fn query_vector(&self, index: &str, text: &str, dimension: usize) -> Result<Vec<f32>> {
        let key = format!("query:{}:{}", self.embedder.model_name(), text);
        let (vector, hit) = self
            .embeddings
            .get_or_compute(&key, &[], self.options.embedding_ttl, || async {
                let texts = vec![text.to_string()];
                let embedder = &self.embedder;
                let mut vectors = self
                    .options
                    .retry
                    .run(
                        &[],
                        || embedder.embed(&texts),
                        |attempt, delay, err| {
                            debug!(attempt, ?delay, error = %err, "retrying query embedding")
                        },
                    )
                    .await?;
                match vectors.pop() {
                    Some(v) if vectors.is_empty() => Ok(v),
                    _ => Err(Error::from(EmbeddingError::fatal(
                        "provider must return exactly one vector per query",
                    ))),
                }
            })
            .await?;
        debug!(index, hit, "query embedding");

        if vector.len() != dimension {
            return Err(IndexError::DimensionConflict {
                index: index.to_string(),
                expected: dimension,
                actual: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }
}
