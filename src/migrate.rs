use sqlx::SqlitePool;

/// Version stamped into every artifact's `generation_meta` row.
pub const SCHEMA_VERSION: i64 = 1;

/// Create the tables of a generation artifact.
pub async fn create_generation_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Single-row table describing the generation.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generation_meta (
            schema_version INTEGER NOT NULL,
            index_name TEXT NOT NULL,
            generation_id INTEGER NOT NULL,
            dimension INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            entry_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            path TEXT PRIMARY KEY,
            format TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            chunk_ids TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Terms are JSON `[[term, tf], ...]`; embeddings are little-endian f32 BLOBs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            chunk_id TEXT PRIMARY KEY,
            document_path TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            byte_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            terms TEXT NOT NULL,
            embedding BLOB NOT NULL,
            tombstone INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_document ON entries(document_path)")
        .execute(pool)
        .await?;

    Ok(())
}
