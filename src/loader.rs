//! Document enumeration and loading.
//!
//! The [`DocumentLoader`] trait is the seam between the index manager and
//! wherever documents come from. [`FsLoader`] walks a directory with
//! `walkdir`, authorizing every entry before it is stat'ed or read:
//! denied directories are not descended into, and denied entries are
//! reported as skipped instead of being touched.
//!
//! # Admission rules
//!
//! A file becomes a [`DocumentMeta`] only if it passes authorization, has a
//! supported extension (see [`DocumentFormat::from_extension`]) and is no
//! larger than `security.max_file_size`. Everything else lands in
//! [`Listing::skipped`] with its reason.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use walkdir::WalkDir;

use docfence_core::chunk::{chunk_text, content_hash};
use docfence_core::models::{Chunk, DocumentFormat};
use docfence_core::{DenialReason, Error, Result};

use crate::extract::extract_text;
use crate::policy::{AuthorizedPath, Decision, PathValidator};

/// Metadata for one admitted document, gathered without reading its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub path: AuthorizedPath,
    pub format: DocumentFormat,
    pub size: u64,
    /// Modification time as Unix seconds.
    pub modified_at: i64,
}

/// Why an entry was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Denied(DenialReason),
    Unsupported,
    TooLarge { size: u64, limit: u64 },
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Denied(r) => write!(f, "denied: {}", r),
            SkipReason::Unsupported => f.write_str("unsupported format"),
            SkipReason::TooLarge { size, limit } => {
                write!(f, "{} bytes exceeds limit of {}", size, limit)
            }
            SkipReason::Unreadable(e) => write!(f, "unreadable: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub path: String,
    pub reason: SkipReason,
}

/// Result of enumerating a directory.
#[derive(Debug, Default)]
pub struct Listing {
    /// Admitted documents, ordered by canonical path.
    pub documents: Vec<DocumentMeta>,
    pub skipped: Vec<Skipped>,
}

/// A document's content hash and chunks.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub meta: DocumentMeta,
    /// SHA-256 of the raw file bytes.
    pub content_hash: String,
    pub chunks: Vec<Chunk>,
}

/// Source of documents for the index manager.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Enumerate documents under `dir`, authorizing each entry first.
    async fn list(&self, dir: &AuthorizedPath, validator: &Arc<PathValidator>) -> Result<Listing>;

    /// Admission check for a single authorized path.
    async fn describe(&self, path: &AuthorizedPath) -> std::result::Result<DocumentMeta, SkipReason>;

    /// Content hash of the raw bytes, without extracting or chunking.
    async fn fingerprint(&self, doc: &DocumentMeta) -> Result<String>;

    /// Read, extract and chunk one document. Extraction failures are
    /// [`Error::Parse`].
    async fn load(&self, doc: &DocumentMeta) -> Result<LoadedDocument>;
}

/// Loads documents from the local filesystem.
#[derive(Debug, Clone)]
pub struct FsLoader {
    max_file_size: u64,
    max_tokens: usize,
}

impl FsLoader {
    pub fn new(max_file_size: u64, max_tokens: usize) -> Self {
        Self {
            max_file_size,
            max_tokens,
        }
    }

    async fn read_admitted(&self, doc: &DocumentMeta) -> Result<Vec<u8>> {
        let bytes = tokio::fs::read(doc.path.as_path()).await?;
        if bytes.len() as u64 > self.max_file_size {
            return Err(Error::Parse {
                path: doc.path.key(),
                message: format!("file grew past the {} byte limit", self.max_file_size),
            });
        }
        Ok(bytes)
    }
}

fn describe_path(
    path: &AuthorizedPath,
    max_file_size: u64,
) -> std::result::Result<DocumentMeta, SkipReason> {
    let format = path
        .as_path()
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentFormat::from_extension)
        .ok_or(SkipReason::Unsupported)?;
    let metadata =
        std::fs::metadata(path.as_path()).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(SkipReason::Unsupported);
    }
    if metadata.len() > max_file_size {
        return Err(SkipReason::TooLarge {
            size: metadata.len(),
            limit: max_file_size,
        });
    }
    let modified_at = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Ok(DocumentMeta {
        path: path.clone(),
        format,
        size: metadata.len(),
        modified_at,
    })
}

fn walk(dir: &AuthorizedPath, validator: &PathValidator, max_file_size: u64) -> Listing {
    let mut documents = BTreeMap::new();
    let mut skipped = Vec::new();

    if !dir.as_path().is_dir() {
        match describe_path(dir, max_file_size) {
            Ok(meta) => {
                documents.insert(meta.path.clone(), meta);
            }
            Err(reason) => skipped.push(Skipped {
                path: dir.key(),
                reason,
            }),
        }
    }

    let mut it = WalkDir::new(dir.as_path())
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                skipped.push(Skipped {
                    path,
                    reason: SkipReason::Unreadable(e.to_string()),
                });
                continue;
            }
        };
        let is_dir = entry.file_type().is_dir();
        match validator.authorize(entry.path()) {
            Decision::Denied(reason) => {
                // Never open a denied directory.
                if is_dir {
                    it.skip_current_dir();
                }
                skipped.push(Skipped {
                    path: entry.path().display().to_string(),
                    reason: SkipReason::Denied(reason),
                });
            }
            Decision::Allowed(_) if is_dir => {}
            Decision::Allowed(path) => {
                if path.as_path().is_dir() {
                    // Symlinked directories are not followed.
                    continue;
                }
                match describe_path(&path, max_file_size) {
                    Ok(meta) => {
                        documents.insert(meta.path.clone(), meta);
                    }
                    Err(reason) => skipped.push(Skipped {
                        path: path.key(),
                        reason,
                    }),
                }
            }
        }
    }

    Listing {
        documents: documents.into_values().collect(),
        skipped,
    }
}

#[async_trait]
impl DocumentLoader for FsLoader {
    async fn list(&self, dir: &AuthorizedPath, validator: &Arc<PathValidator>) -> Result<Listing> {
        let dir = dir.clone();
        let validator = Arc::clone(validator);
        let max = self.max_file_size;
        tokio::task::spawn_blocking(move || walk(&dir, &validator, max))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    async fn describe(&self, path: &AuthorizedPath) -> std::result::Result<DocumentMeta, SkipReason> {
        describe_path(path, self.max_file_size)
    }

    async fn fingerprint(&self, doc: &DocumentMeta) -> Result<String> {
        let bytes = self.read_admitted(doc).await?;
        Ok(content_hash(&bytes))
    }

    async fn load(&self, doc: &DocumentMeta) -> Result<LoadedDocument> {
        let bytes = self.read_admitted(doc).await?;
        let key = doc.path.key();
        let hash = content_hash(&bytes);
        let format = doc.format;
        let max_tokens = self.max_tokens;
        let path_key = key.clone();
        let chunks = tokio::task::spawn_blocking(move || {
            extract_text(&bytes, format).map(|text| chunk_text(&path_key, &text, max_tokens))
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
        .map_err(|e| Error::Parse {
            path: key,
            message: e.to_string(),
        })?;

        Ok(LoadedDocument {
            meta: doc.clone(),
            content_hash: hash,
            chunks,
        })
    }
}
