//! # docfence
//!
//! Sandboxed document indexing with hybrid (keyword + semantic) search.
//!
//! docfence indexes documents that live under an explicit whitelist of
//! directories. Every path is authorized before it is opened, indexes are
//! versioned as immutable generations that readers pin for the duration of
//! a query, and builds commit atomically: a crash or a failed build always
//! leaves the previous generation in place.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ PathValidator│──▶│ IndexManager│──▶│ SqliteStore  │
//! │ whitelist +  │   │ diff, embed,│   │ manifest +   │
//! │ deny globs   │   │ commit      │   │ gen-N.sqlite │
//! └──────────────┘   └──────┬──────┘   └──────────────┘
//!                           │ ArcSwap<Generation>
//!                           ▼
//!                    ┌─────────────┐
//!                    │SearchEngine │  BM25 + vectors, hybrid merge
//!                    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docfence init                          # create the data directory
//! docfence create docs                   # create an index
//! docfence build docs ~/notes            # index everything under ~/notes
//! docfence search docs "ownership" --mode hybrid
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`policy`] | Path whitelist and authorization |
//! | [`loader`] | Filesystem enumeration and document loading |
//! | [`extract`] | Per-format text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`retry`] | Backoff for embedding calls |
//! | [`cache`] | Single-flight TTL cache |
//! | [`manager`] | Index lifecycle, builds and compaction |
//! | [`engine`] | Query execution |
//! | [`sqlite_store`] | Durable generation storage |
//! | [`db`] | SQLite connections |
//! | [`migrate`] | Generation artifact schema |
//! | [`telemetry`] | Logging setup and event sinks |
//! | [`service`] | Assembles everything from config |

pub mod cache;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod loader;
pub mod manager;
pub mod migrate;
pub mod policy;
pub mod retry;
pub mod service;
pub mod sqlite_store;
pub mod telemetry;

pub use docfence_core as core;
