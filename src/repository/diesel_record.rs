//! Diesel-based source record repository for SQLite.

use diesel::prelude::*;

use super::diesel_models::{NewRecord, RecordRow};
use super::diesel_pool::{run_blocking, SqlitePool};
use super::parse_datetime;
use crate::models::{ArtifactKind, Record};
use crate::schema::{bookmark_artifacts, bookmarks, records};

/// Convert a database record to a domain model.
impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record {
            id: row.id,
            owner_id: row.owner_id,
            filename: row.filename,
            content_type: row.content_type,
            content: row.content,
            created_at: parse_datetime(&row.created_at),
        }
    }
}

/// Diesel-based record repository. Every lookup is scoped to an owner.
#[derive(Clone)]
pub struct DieselRecordRepository {
    pool: SqlitePool,
}

impl DieselRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new record.
    pub async fn create(&self, record: &Record) -> Result<(), diesel::result::Error> {
        let record = record.clone();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let created_at = record.created_at.to_rfc3339();
            diesel::insert_into(records::table)
                .values(NewRecord {
                    id: &record.id,
                    owner_id: &record.owner_id,
                    filename: &record.filename,
                    content_type: &record.content_type,
                    content: &record.content,
                    created_at: &created_at,
                })
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Get a record by ID if it belongs to `owner_id`.
    pub async fn get_owned(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<Record>, diesel::result::Error> {
        let owner_id = owner_id.to_string();
        let id = id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            records::table
                .find(&id)
                .filter(records::owner_id.eq(&owner_id))
                .first::<RecordRow>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Record::from))
    }

    /// Get the owner's record stored under `filename` (URL-encoded form).
    pub async fn get_owned_by_filename(
        &self,
        owner_id: &str,
        filename: &str,
    ) -> Result<Option<Record>, diesel::result::Error> {
        let owner_id = owner_id.to_string();
        let filename = filename.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            records::table
                .filter(records::owner_id.eq(&owner_id))
                .filter(records::filename.eq(&filename))
                .first::<RecordRow>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Record::from))
    }

    /// Check whether the owner already has a record with this filename.
    pub async fn filename_exists(
        &self,
        owner_id: &str,
        filename: &str,
    ) -> Result<bool, diesel::result::Error> {
        let owner_id = owner_id.to_string();
        let filename = filename.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = records::table
                .filter(records::owner_id.eq(&owner_id))
                .filter(records::filename.eq(&filename))
                .select(count_star())
                .first(conn)?;
            Ok(count > 0)
        })
        .await
    }

    /// Delete an owned record together with its bookmark and artifacts.
    ///
    /// Returns the blob hashes the deleted artifacts referenced, or `None`
    /// when the owner has no such record.
    pub async fn delete_owned(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<Vec<String>>, diesel::result::Error> {
        let owner_id = owner_id.to_string();
        let id = id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let found: Option<String> = records::table
                    .find(&id)
                    .filter(records::owner_id.eq(&owner_id))
                    .select(records::id)
                    .first(conn)
                    .optional()?;
                if found.is_none() {
                    return Ok(None);
                }

                let bookmark_ids: Vec<String> = bookmarks::table
                    .filter(bookmarks::record_id.eq(&id))
                    .select(bookmarks::id)
                    .load(conn)?;

                let hashes: Vec<String> = bookmark_artifacts::table
                    .filter(bookmark_artifacts::bookmark_id.eq_any(&bookmark_ids))
                    .select(bookmark_artifacts::blob_hash)
                    .load(conn)?;

                // Delete artifacts
                diesel::delete(
                    bookmark_artifacts::table
                        .filter(bookmark_artifacts::bookmark_id.eq_any(&bookmark_ids)),
                )
                .execute(conn)?;

                // Delete bookmark
                diesel::delete(bookmarks::table.filter(bookmarks::record_id.eq(&id)))
                    .execute(conn)?;

                // Delete record
                diesel::delete(records::table.find(&id)).execute(conn)?;
                Ok(Some(hashes))
            })
        })
        .await
    }

    /// Filenames of the owner's records whose bookmark holds a snapshot.
    pub async fn cached_filenames(
        &self,
        owner_id: &str,
    ) -> Result<Vec<String>, diesel::result::Error> {
        let owner_id = owner_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            // One document per bookmark, so the join yields one row per record.
            bookmarks::table
                .inner_join(records::table)
                .inner_join(bookmark_artifacts::table)
                .filter(records::owner_id.eq(&owner_id))
                .filter(bookmarks::cached_at.is_not_null())
                .filter(bookmark_artifacts::kind.eq(ArtifactKind::Document.as_str()))
                .select(records::filename)
                .order(records::filename.asc())
                .load::<String>(conn)
        })
        .await
    }
}
