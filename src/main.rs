//! # docfence CLI
//!
//! The `docfence` binary creates indexes, builds them from whitelisted
//! directories and searches them.
//!
//! ## Usage
//!
//! ```bash
//! docfence --config ./config/docfence.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docfence init` | Validate config and create the data directory |
//! | `docfence create <index>` | Create an index |
//! | `docfence build <index> <root>` | Index everything under a directory |
//! | `docfence update <index> <path>` | Re-index or drop one document |
//! | `docfence remove <index> <path>...` | Drop documents from an index, keeping the files |
//! | `docfence docs <index>` | List indexed documents |
//! | `docfence outdated <index>` | Find documents that changed since indexing |
//! | `docfence search <index> "<query>"` | Search an index |
//! | `docfence status [index]` | Show index statistics |
//! | `docfence compact <index>` | Purge tombstones and old generations |
//! | `docfence check <path>...` | Show how paths are authorized |
//!
//! ## Examples
//!
//! ```bash
//! docfence create notes --config ./config/docfence.toml
//! docfence build notes ~/notes
//! docfence search notes "borrow checker" --mode hybrid --k 5
//! docfence check ~/notes/.env
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use docfence::config;
use docfence::engine::SearchRequest;
use docfence::policy::{AccessPolicy, Decision};
use docfence::service::Service;
use docfence::telemetry::init_tracing;
use docfence_core::models::{
    BuildSummary, IndexStructure, Metric, SearchMode, Staleness, StructureKind,
};

/// docfence: sandboxed document indexing with hybrid search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docfence.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docfence",
    about = "docfence: sandboxed document indexing with hybrid (keyword + semantic) search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docfence.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and create the data directory.
    Init,

    /// Create an index. Re-running with the same dimension is a no-op.
    Create {
        index: String,

        /// Vector dimension. Defaults to the embedding provider's.
        #[arg(long)]
        dims: Option<usize>,

        /// Similarity metric: `cosine` or `inner_product`.
        #[arg(long)]
        metric: Option<String>,
    },

    /// Index every admitted document under a directory.
    ///
    /// Unchanged documents are skipped, changed ones re-chunked and
    /// re-embedded, and documents that disappeared are removed. Ctrl-C
    /// cancels the build and keeps the previous generation.
    Build { index: String, root: PathBuf },

    /// Re-index a single document, or drop it if it was deleted.
    Update { index: String, path: PathBuf },

    /// Drop documents from an index. The files themselves are not touched.
    Remove {
        index: String,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List the documents in an index's current generation.
    Docs {
        index: String,

        #[arg(long)]
        json: bool,
    },

    /// List indexed documents that are missing, denied, or changed on disk.
    Outdated {
        index: String,

        /// Re-index (or drop) every outdated document.
        #[arg(long)]
        update: bool,

        #[arg(long)]
        json: bool,
    },

    /// Search an index.
    Search {
        index: String,

        query: String,

        /// `keyword` (BM25), `semantic` (vector), or `hybrid` (weighted merge).
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Number of results. Capped at `retrieval.max_k`.
        #[arg(long)]
        k: Option<usize>,

        /// Hybrid weight of the semantic score, in [0, 1].
        #[arg(long)]
        alpha: Option<f64>,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show statistics for one or all indexes.
    Status {
        index: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Purge tombstoned entries and reclaim superseded generations.
    Compact {
        index: String,

        /// Compact even below the configured tombstone ratio.
        #[arg(long)]
        force: bool,
    },

    /// Print the authorization decision for each path.
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&cfg.storage.data_dir).with_context(|| {
                format!(
                    "Failed to create data directory: {}",
                    cfg.storage.data_dir.display()
                )
            })?;
            let policy = AccessPolicy::from_config(&cfg.security)?;
            println!("Data directory: {}", cfg.storage.data_dir.display());
            for dir in policy.allowed() {
                println!("Allowed: {} (deny: {:?})", dir.root().display(), dir.patterns());
            }
            println!("Initialized successfully.");
        }
        Commands::Create {
            index,
            dims,
            metric,
        } => {
            let svc = Service::open(cfg).await?;
            let metric = match metric {
                Some(m) => m.parse::<Metric>().map_err(anyhow::Error::msg)?,
                None => svc.config.index.metric,
            };
            let dims = dims.unwrap_or_else(|| svc.embedder().dims());
            let structure = IndexStructure {
                kind: StructureKind::Flat,
                metric,
            };
            let handle = svc.manager.create_index(&index, dims, structure).await?;
            println!(
                "Index {} ready (dimension {}, metric {}).",
                handle.name, handle.dimension, handle.structure.metric
            );
        }
        Commands::Build { index, root } => {
            let svc = Service::open(cfg).await?;
            let build = svc.manager.build_full(&index, &root);
            tokio::pin!(build);
            let summary = tokio::select! {
                res = &mut build => res,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Cancelling build of {}...", index);
                    svc.manager.cancel(&index);
                    build.await
                }
            }?;
            print_summary(&index, &summary);
        }
        Commands::Update { index, path } => {
            let svc = Service::open(cfg).await?;
            let summary = svc.manager.update_document(&index, &path).await?;
            print_summary(&index, &summary);
        }
        Commands::Remove { index, paths } => {
            let svc = Service::open(cfg).await?;
            let summary = svc.manager.remove_documents(&index, &paths).await?;
            print_summary(&index, &summary);
        }
        Commands::Docs { index, json } => {
            let svc = Service::open(cfg).await?;
            let docs = svc.manager.list_documents(&index)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("No documents.");
            } else {
                for d in &docs {
                    let flag = if d.exists { "" } else { "  [missing]" };
                    println!(
                        "{}  ({}, {} bytes, {} chunks){}",
                        d.path, d.format, d.size, d.chunks, flag
                    );
                }
            }
        }
        Commands::Outdated {
            index,
            update,
            json,
        } => {
            let svc = Service::open(cfg).await?;
            let outdated = svc.manager.find_outdated(&index).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outdated)?);
            } else if outdated.is_empty() {
                println!("All documents up to date.");
            } else {
                for o in &outdated {
                    println!("{}  ({})", o.path, o.staleness);
                }
            }
            if update {
                for o in &outdated {
                    let path = std::path::Path::new(&o.path);
                    let summary = match o.staleness {
                        Staleness::Denied { .. } => {
                            svc.manager
                                .remove_documents(&index, &[path.to_path_buf()])
                                .await
                        }
                        _ => svc.manager.update_document(&index, path).await,
                    };
                    match summary {
                        Ok(s) => print_summary(&index, &s),
                        Err(e) => eprintln!("{}: {}", o.path, e),
                    }
                }
            }
        }
        Commands::Search {
            index,
            query,
            mode,
            k,
            alpha,
            json,
        } => {
            let mode: SearchMode = mode.parse().map_err(anyhow::Error::msg)?;
            let svc = Service::open(cfg).await?;
            let req = SearchRequest {
                index,
                query,
                k,
                mode,
                alpha,
            };
            let resp = svc.engine.search(&req).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else if resp.hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in resp.hits.iter().enumerate() {
                    println!("{}. [{:.2}] {}", i + 1, hit.score, hit.document_path);
                    println!("    chunk: {}", hit.chunk_id);
                    println!("    {}", hit.snippet.replace('\n', " "));
                    println!();
                }
            }
        }
        Commands::Status { index, json } => {
            let svc = Service::open(cfg).await?;
            let stats = match index {
                Some(name) => vec![svc.manager.stats(&name)?],
                None => svc.manager.list(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else if stats.is_empty() {
                println!("No indexes.");
            } else {
                for s in &stats {
                    println!(
                        "{}: generation {} [{}], {} documents, {} live entries, {} tombstones, dimension {}, metric {}, {} retained generations",
                        s.name,
                        s.generation,
                        s.status,
                        s.documents,
                        s.live_entries,
                        s.tombstones,
                        s.dimension,
                        s.structure.metric,
                        s.retained_generations,
                    );
                }
            }
        }
        Commands::Compact { index, force } => {
            let svc = Service::open(cfg).await?;
            let report = svc.manager.compact(&index, force).await?;
            match report.generation {
                Some(g) => println!(
                    "Compacted {}: {} tombstones removed, generation {} committed, {} old generations reclaimed.",
                    index, report.tombstones_removed, g, report.generations_reclaimed
                ),
                None => println!(
                    "Nothing to purge in {}; {} old generations reclaimed.",
                    index, report.generations_reclaimed
                ),
            }
        }
        Commands::Check { paths } => {
            let policy = AccessPolicy::from_config(&cfg.security)?;
            let mut denied = 0;
            for path in &paths {
                match policy.authorize(path) {
                    Decision::Allowed(p) => println!("allowed  {}", p),
                    Decision::Denied(reason) => {
                        denied += 1;
                        println!("denied   {} ({})", path.display(), reason);
                    }
                }
            }
            if denied > 0 {
                bail!("{} of {} paths denied", denied, paths.len());
            }
        }
    }

    Ok(())
}

fn print_summary(index: &str, s: &BuildSummary) {
    println!(
        "{}: {} added, {} updated, {} removed, {} skipped, {} chunks embedded in {}ms",
        index, s.added, s.updated, s.removed, s.skipped, s.chunks_embedded, s.duration_ms
    );
    match s.generation {
        Some(g) => println!("Committed generation {}.", g),
        None => println!("No changes; current generation kept."),
    }
}
