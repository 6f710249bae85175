//! # docfence core
//!
//! Shared, I/O-free logic for docfence: data models, chunking, keyword
//! tokenization, immutable index generations, ranking, the persistence and
//! embedding traits, observability events and the error taxonomy.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! runtime-specific dependencies.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod events;
pub mod generation;
pub mod models;
pub mod search;
pub mod store;
pub mod tokenize;

pub use error::{CorruptionError, DenialReason, EmbeddingError, Error, IndexError, Result};
