use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;

/// How a generation artifact is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a fresh file for writing a new generation.
    Create,
    /// Open an existing, committed generation read-only.
    ReadOnly,
}

/// Open one generation artifact.
///
/// Artifacts are written once and never modified afterwards, so they use a
/// rollback journal rather than WAL: the finished file is self-contained and
/// can be renamed into place without sidecar files.
pub async fn connect(path: &Path, mode: OpenMode) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new().filename(path);
    let options = match mode {
        OpenMode::Create => options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Full),
        OpenMode::ReadOnly => options.read_only(true),
    };

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}
