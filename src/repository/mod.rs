//! Persistence: SQLite via Diesel plus the content-addressed blob store.

pub mod blob_store;
mod diesel_bookmark;
pub mod diesel_models;
pub mod diesel_pool;
mod diesel_record;
mod migrations;

pub use blob_store::{hash_bytes, BlobStore};
pub use diesel_bookmark::{DieselBookmarkRepository, SnapshotCommit};
pub use diesel_pool::{create_diesel_pool, create_diesel_pool_from_url, run_blocking, SqlitePool};
pub use diesel_record::DieselRecordRepository;
pub use migrations::run_migrations;

use chrono::{DateTime, Utc};

/// Failure of the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Blob store error: {0}")]
    Blob(#[from] std::io::Error),
}

/// Parse a stored RFC 3339 timestamp, falling back to now for corrupt rows.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse an optional stored timestamp. Unparseable values read as absent.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Open the database, create the schema, and open the blob store.
pub async fn open(
    settings: &crate::config::Settings,
) -> anyhow::Result<(SqlitePool, BlobStore)> {
    settings.ensure_directories()?;
    let pool = create_diesel_pool(&settings.database_path())?;
    run_migrations(&pool).await?;
    Ok((pool, BlobStore::new(settings.blobs_dir.clone())))
}
