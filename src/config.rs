//! TOML configuration.
//!
//! Every section except `[security]` is optional; missing keys fall back to
//! the `default_*` functions below. [`load_config`] parses and validates the
//! file so that later stages can trust the values.
//!
//! ```toml
//! [storage]
//! data_dir = "./data/index"
//!
//! [[security.allowed]]
//! path = "./docs"
//! deny = [".*", "*.exe"]
//!
//! [embedding]
//! provider = "hash"
//! dims = 256
//!
//! [retrieval]
//! hybrid_alpha = 0.5
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docfence_core::models::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Superseded generations kept on disk as fallbacks.
    #[serde(default = "default_retain_generations")]
    pub retain_generations: usize,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retain_generations: default_retain_generations(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

impl StorageConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_retain_generations() -> usize {
    2
}
fn default_io_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub allowed: Vec<AllowedDirConfig>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AllowedDirConfig {
    pub path: PathBuf,
    /// Glob patterns matched against each path component below `path`.
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Configured dimensionality, with the `hash` provider defaulting to 256.
    pub fn effective_dims(&self) -> Option<usize> {
        match (self.provider.as_str(), self.dims) {
            (_, Some(d)) => Some(d),
            ("hash", None) => Some(256),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub metric: Metric,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub max_chunks_per_document: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            default_k: default_k(),
            max_k: default_max_k(),
            candidate_k: default_candidate_k(),
            min_score: None,
            max_chunks_per_document: None,
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.5
}
fn default_k() -> usize {
    3
}
fn default_max_k() -> usize {
    50
}
fn default_candidate_k() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_embedding_ttl_secs")]
    pub embedding_ttl_secs: u64,
    #[serde(default = "default_query_ttl_secs")]
    pub query_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_ttl_secs: default_embedding_ttl_secs(),
            query_ttl_secs: default_query_ttl_secs(),
            max_entries: default_max_entries(),
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

fn default_embedding_ttl_secs() -> u64 {
    24 * 3600
}
fn default_query_ttl_secs() -> u64 {
    60
}
fn default_max_entries() -> usize {
    10_000
}
fn default_wait_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompactionConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Compact once this fraction of entries is tombstoned.
    #[serde(default = "default_tombstone_ratio")]
    pub tombstone_ratio: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tombstone_ratio: default_tombstone_ratio(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}
fn default_tombstone_ratio() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_format() -> String {
    "pretty".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.security.allowed.is_empty() {
        bail!("security.allowed must list at least one directory");
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    let r = &config.retrieval;
    if !(0.0..=1.0).contains(&r.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if r.default_k == 0 || r.max_k == 0 {
        bail!("retrieval.default_k and retrieval.max_k must be >= 1");
    }
    if r.default_k > r.max_k {
        bail!("retrieval.default_k must not exceed retrieval.max_k");
    }
    if r.max_chunks_per_document == Some(0) {
        bail!("retrieval.max_chunks_per_document must be >= 1 when set");
    }

    let e = &config.embedding;
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if e.max_attempts == 0 {
        bail!("embedding.max_attempts must be >= 1");
    }
    match e.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                bail!("embedding.model must be specified when provider is '{}'", e.provider);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or ollama.",
            other
        ),
    }
    match e.effective_dims() {
        Some(d) if d > 0 => {}
        _ => bail!("embedding.dims must be > 0 when provider is '{}'", e.provider),
    }

    if !(0.0..=1.0).contains(&config.compaction.tombstone_ratio) {
        bail!("compaction.tombstone_ratio must be in [0.0, 1.0]");
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => bail!("logging.format must be pretty or json, got '{}'", other),
    }

    Ok(())
}
