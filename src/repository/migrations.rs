//! Schema creation.
//!
//! Statements are idempotent and run at every startup.

use diesel::prelude::*;

use super::diesel_pool::{run_blocking, DieselError, SqlitePool};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        content BLOB NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (owner_id, filename)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS bookmarks (
        id TEXT PRIMARY KEY NOT NULL,
        record_id TEXT NOT NULL UNIQUE REFERENCES records(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        cached_at TEXT,
        cache_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS bookmark_artifacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        bookmark_id TEXT NOT NULL REFERENCES bookmarks(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        content_type TEXT NOT NULL,
        blob_hash TEXT NOT NULL,
        size BIGINT NOT NULL,
        position INTEGER NOT NULL,
        UNIQUE (bookmark_id, name)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_blob ON bookmark_artifacts(blob_hash)",
];

/// Create all tables and indexes if they do not exist.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DieselError> {
    run_blocking(pool.clone(), |conn| {
        conn.transaction::<_, DieselError, _>(|conn| {
            for statement in SCHEMA {
                diesel::sql_query(*statement).execute(conn)?;
            }
            Ok(())
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::diesel_pool::create_diesel_pool;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let pool = create_diesel_pool(&dir.path().join("test.db")).unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<TableName> = run_blocking(pool, |conn| {
            diesel::sql_query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .load(conn)
        })
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["bookmark_artifacts", "bookmarks", "records"]);
    }

    #[derive(diesel::QueryableByName)]
    struct TableName {
        #[diesel(sql_type = diesel::sql_types::Text)]
        name: String,
    }
}
