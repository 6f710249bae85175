//! On-disk [`GenerationStore`] backed by one SQLite file per generation.
//!
//! Layout under `storage.data_dir`:
//!
//! ```text
//! <data_dir>/<index>/manifest.json
//! <data_dir>/<index>/gen-00000000000000000001.sqlite
//! <data_dir>/<index>/gen-00000000000000000002.sqlite
//! ```
//!
//! Both kinds of file are written to a `.tmp` sibling, fsynced, and renamed
//! over the final name, so a crash leaves either the old file or the new
//! one. An artifact is complete before the manifest names it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docfence_core::embedding::{blob_to_vec, vec_to_blob};
use docfence_core::generation::Generation;
use docfence_core::models::{DocumentFormat, DocumentRecord, IndexEntry};
use docfence_core::store::{verify_generation, GenerationInfo, GenerationStore, IndexManifest};
use docfence_core::{CorruptionError, Error, Result};

use crate::db::{self, OpenMode};
use crate::migrate::{create_generation_schema, SCHEMA_VERSION};

const MANIFEST_FILE: &str = "manifest.json";

pub struct SqliteStore {
    data_dir: PathBuf,
}

impl SqliteStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn index_dir(&self, index: &str) -> PathBuf {
        self.data_dir.join(index)
    }

    /// Final path of a generation artifact.
    pub fn generation_path(&self, index: &str, id: u64) -> PathBuf {
        self.index_dir(index).join(format!("gen-{:020}.sqlite", id))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn sync_dir(dir: &Path) {
    // Directory fsync is not available on every platform.
    if let Ok(f) = tokio::fs::File::open(dir).await {
        let _ = f.sync_all().await;
    }
}

/// Atomically replace `path` with `bytes`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::File::open(&tmp).await?.sync_all().await?;
    tokio::fs::rename(&tmp, path).await?;
    if let Some(dir) = path.parent() {
        sync_dir(dir).await;
    }
    Ok(())
}

async fn write_tables(
    pool: &SqlitePool,
    index: &str,
    generation: &Generation,
) -> Result<(), sqlx::Error> {
    create_generation_schema(pool).await?;
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO generation_meta (schema_version, index_name, generation_id, dimension, checksum, entry_count, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(SCHEMA_VERSION)
    .bind(index)
    .bind(generation.id() as i64)
    .bind(generation.dimension() as i64)
    .bind(generation.checksum())
    .bind(generation.entries().count() as i64)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for doc in generation.documents() {
        let chunk_ids = serde_json::to_string(&doc.chunk_ids)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            "INSERT INTO documents (path, format, size, modified_at, content_hash, chunk_ids)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.path)
        .bind(doc.format.as_str())
        .bind(doc.size as i64)
        .bind(doc.modified_at)
        .bind(&doc.content_hash)
        .bind(chunk_ids)
        .execute(&mut *tx)
        .await?;
    }

    for entry in generation.entries() {
        let terms =
            serde_json::to_string(&entry.terms).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            "INSERT INTO entries (chunk_id, document_path, ordinal, byte_offset, text, content_hash, terms, embedding, tombstone)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.chunk_id)
        .bind(&entry.document_path)
        .bind(i64::from(entry.ordinal))
        .bind(entry.offset as i64)
        .bind(&entry.text)
        .bind(&entry.content_hash)
        .bind(terms)
        .bind(vec_to_blob(&entry.vector))
        .bind(entry.tombstone)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Read every table back. Any decoding problem is reported as a string so
/// the caller can wrap it as corruption.
async fn read_tables(pool: &SqlitePool, index: &str) -> std::result::Result<Generation, String> {
    let meta = sqlx::query(
        "SELECT schema_version, generation_id, dimension FROM generation_meta LIMIT 1",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| e.to_string())?;
    let version: i64 = meta.try_get("schema_version").map_err(|e| e.to_string())?;
    if version != SCHEMA_VERSION {
        return Err(format!("unsupported schema version {}", version));
    }
    let id: i64 = meta.try_get("generation_id").map_err(|e| e.to_string())?;
    let dimension: i64 = meta.try_get("dimension").map_err(|e| e.to_string())?;

    let doc_rows = sqlx::query(
        "SELECT path, format, size, modified_at, content_hash, chunk_ids FROM documents",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;
    let mut documents = Vec::with_capacity(doc_rows.len());
    for row in doc_rows {
        let format: String = row.try_get("format").map_err(|e| e.to_string())?;
        let chunk_ids: String = row.try_get("chunk_ids").map_err(|e| e.to_string())?;
        let size: i64 = row.try_get("size").map_err(|e| e.to_string())?;
        documents.push(DocumentRecord {
            path: row.try_get("path").map_err(|e| e.to_string())?,
            format: format.parse::<DocumentFormat>()?,
            size: size as u64,
            modified_at: row.try_get("modified_at").map_err(|e| e.to_string())?,
            content_hash: row.try_get("content_hash").map_err(|e| e.to_string())?,
            chunk_ids: serde_json::from_str(&chunk_ids).map_err(|e| e.to_string())?,
        });
    }

    let entry_rows = sqlx::query(
        "SELECT chunk_id, document_path, ordinal, byte_offset, text, content_hash, terms, embedding, tombstone
         FROM entries",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;
    let mut entries = Vec::with_capacity(entry_rows.len());
    for row in entry_rows {
        let ordinal: i64 = row.try_get("ordinal").map_err(|e| e.to_string())?;
        let offset: i64 = row.try_get("byte_offset").map_err(|e| e.to_string())?;
        let terms: String = row.try_get("terms").map_err(|e| e.to_string())?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(|e| e.to_string())?;
        entries.push(IndexEntry {
            chunk_id: row.try_get("chunk_id").map_err(|e| e.to_string())?,
            document_path: row.try_get("document_path").map_err(|e| e.to_string())?,
            ordinal: u32::try_from(ordinal).map_err(|e| e.to_string())?,
            offset: offset as u64,
            text: row.try_get("text").map_err(|e| e.to_string())?,
            content_hash: row.try_get("content_hash").map_err(|e| e.to_string())?,
            terms: serde_json::from_str(&terms).map_err(|e| e.to_string())?,
            vector: blob_to_vec(&blob),
            tombstone: row.try_get("tombstone").map_err(|e| e.to_string())?,
        });
    }

    Generation::from_parts(index, id as u64, dimension as usize, entries, documents)
        .map_err(|e| e.to_string())
}

#[async_trait]
impl GenerationStore for SqliteStore {
    async fn list_manifests(&self) -> Result<Vec<IndexManifest>> {
        let mut out = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(manifest) = self.read_manifest(&name).await? {
                out.push(manifest);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn read_manifest(&self, index: &str) -> Result<Option<IndexManifest>> {
        let path = self.index_dir(index).join(MANIFEST_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let dir = self.index_dir(&manifest.name);
        tokio::fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&dir.join(MANIFEST_FILE), &bytes).await
    }

    async fn write_generation(&self, index: &str, generation: &Generation) -> Result<()> {
        let dir = self.index_dir(index);
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.generation_path(index, generation.id());
        let tmp = tmp_path(&path);
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let pool = db::connect(&tmp, OpenMode::Create)
            .await
            .map_err(Error::storage)?;
        let written = write_tables(&pool, index, generation).await;
        pool.close().await;
        if let Err(e) = written {
            if let Err(rm) = tokio::fs::remove_file(&tmp).await {
                tracing::warn!(index, path = %tmp.display(), error = %rm, "could not remove partial artifact");
            }
            return Err(Error::storage(e));
        }

        tokio::fs::File::open(&tmp).await?.sync_all().await?;
        tokio::fs::rename(&tmp, &path).await?;
        sync_dir(&dir).await;
        tracing::debug!(index, generation = generation.id(), path = %path.display(), "generation written");
        Ok(())
    }

    async fn read_generation(
        &self,
        manifest: &IndexManifest,
        info: &GenerationInfo,
    ) -> Result<Generation> {
        let path = self.generation_path(&manifest.name, info.id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(CorruptionError::Missing {
                index: manifest.name.clone(),
                generation: info.id,
            }
            .into());
        }
        let unreadable = |reason: String| -> Error {
            CorruptionError::Unreadable {
                index: manifest.name.clone(),
                generation: info.id,
                reason,
            }
            .into()
        };

        let pool = db::connect(&path, OpenMode::ReadOnly)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        let loaded = read_tables(&pool, &manifest.name).await;
        pool.close().await;
        let generation = loaded.map_err(&unreadable)?;
        if generation.dimension() != manifest.dimension {
            return Err(unreadable(format!(
                "dimension {} does not match index dimension {}",
                generation.dimension(),
                manifest.dimension
            )));
        }
        verify_generation(&manifest.name, info, generation)
    }

    async fn delete_generation(&self, index: &str, id: u64) -> Result<()> {
        let path = self.generation_path(index, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfence_core::chunk::chunk_text;
    use docfence_core::models::IndexStructure;
    use tempfile::TempDir;

    fn sample_generation() -> Generation {
        let mut b = Generation::empty(3).builder("docs", 1);
        for (i, chunk) in chunk_text("/docs/a.md", "Rust ownership rules.\n\nBorrowing and lifetimes.", 4)
            .into_iter()
            .enumerate()
        {
            let v = vec![i as f32, 1.0, 0.5];
            b.insert_entry(IndexEntry::from_chunk(chunk, v)).unwrap();
        }
        b.put_document(DocumentRecord {
            path: "/docs/a.md".into(),
            format: DocumentFormat::Markdown,
            size: 46,
            modified_at: 1_700_000_000,
            content_hash: "abc".into(),
            chunk_ids: Vec::new(),
        });
        b.build()
    }

    #[tokio::test]
    async fn generation_roundtrip_preserves_checksum() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::new(tmp.path());
        let g = sample_generation();
        store.write_generation("docs", &g).await.unwrap();

        let mut m = IndexManifest::new("docs", 3, IndexStructure::default());
        m.commit(GenerationInfo::of(&g));
        store.write_manifest(&m).await.unwrap();

        let m2 = store.read_manifest("docs").await.unwrap().unwrap();
        assert_eq!(m2, m);
        let info = m2.info(1).unwrap();
        let back = store.read_generation(&m2, info).await.unwrap();
        assert_eq!(back.checksum(), g.checksum());
        assert_eq!(back.live_count(), g.live_count());
        assert!(!tmp_path(&store.generation_path("docs", 1)).exists());
    }

    #[tokio::test]
    async fn truncated_artifact_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::new(tmp.path());
        let g = sample_generation();
        store.write_generation("docs", &g).await.unwrap();
        let mut m = IndexManifest::new("docs", 3, IndexStructure::default());
        m.commit(GenerationInfo::of(&g));

        std::fs::write(store.generation_path("docs", 1), b"garbage").unwrap();
        let err = store.read_generation(&m, m.info(1).unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::Corruption(CorruptionError::Unreadable { .. })));

        store.delete_generation("docs", 1).await.unwrap();
        let err = store.read_generation(&m, m.info(1).unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::Corruption(CorruptionError::Missing { .. })));
    }

    #[tokio::test]
    async fn listing_skips_directories_without_manifest() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::new(tmp.path().join("data"));
        assert!(store.list_manifests().await.unwrap().is_empty());

        store
            .write_manifest(&IndexManifest::new("b", 4, IndexStructure::default()))
            .await
            .unwrap();
        store
            .write_manifest(&IndexManifest::new("a", 4, IndexStructure::default()))
            .await
            .unwrap();
        std::fs::create_dir_all(tmp.path().join("data/stray")).unwrap();

        let names: Vec<_> = store
            .list_manifests()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
