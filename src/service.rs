//! Wires the configured components together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use docfence_core::embedding::EmbeddingProvider;
use docfence_core::events::ObservabilitySink;

use crate::cache::Cache;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::engine::{SearchEngine, SearchOptions};
use crate::loader::FsLoader;
use crate::manager::{Collaborators, IndexManager, ManagerOptions};
use crate::policy::{AccessPolicy, PathValidator};
use crate::sqlite_store::SqliteStore;
use crate::telemetry::sink_for;

/// A fully assembled engine: path validator, index manager and search.
pub struct Service {
    pub config: Config,
    pub validator: Arc<PathValidator>,
    pub manager: Arc<IndexManager>,
    pub engine: SearchEngine,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Service {
    /// Build from config, using the configured embedding provider.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Self::with_embedder(config, embedder).await
    }

    /// Build from config with an explicit embedding provider.
    pub async fn with_embedder(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let sink: Arc<dyn ObservabilitySink> = Arc::from(sink_for(&config.logging.format));
        let policy = AccessPolicy::from_config(&config.security)?;
        let validator = Arc::new(PathValidator::new(policy, Arc::clone(&sink)));
        let embeddings = Arc::new(Cache::new(
            Duration::from_secs(config.cache.embedding_ttl_secs),
            config.cache.max_entries,
            Duration::from_secs(config.cache.wait_timeout_secs),
        ));

        let parts = Collaborators {
            store: Arc::new(SqliteStore::new(&config.storage.data_dir)),
            embedder: Arc::clone(&embedder),
            loader: Arc::new(FsLoader::new(
                config.security.max_file_size,
                config.chunking.max_tokens,
            )),
            validator: Arc::clone(&validator),
            embeddings: Arc::clone(&embeddings),
            sink: Arc::clone(&sink),
        };
        let manager = IndexManager::open(parts, ManagerOptions::from_config(&config))
            .await
            .with_context(|| {
                format!(
                    "Failed to open indexes in {}",
                    config.storage.data_dir.display()
                )
            })?;
        let manager = Arc::new(manager);

        let engine = SearchEngine::new(
            Arc::clone(&manager),
            Arc::clone(&embedder),
            embeddings,
            sink,
            SearchOptions::from_config(&config),
        );

        Ok(Self {
            config,
            validator,
            manager,
            engine,
            embedder,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Start periodic compaction on the configured interval.
    pub fn spawn_compaction(&self) -> tokio::task::JoinHandle<()> {
        self.manager
            .spawn_compaction(Duration::from_secs(self.config.compaction.interval_secs.max(1)))
    }
}
