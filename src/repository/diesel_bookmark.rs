//! Diesel-based bookmark repository for SQLite.
//!
//! The artifact set, `cached_at` and `cache_error` of a bookmark only ever
//! change together, inside [`DieselBookmarkRepository::commit_snapshot`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::diesel_models::{ArtifactRow, BookmarkRow, NewArtifact, NewBookmark};
use super::diesel_pool::{run_blocking, SqlitePool};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Artifact, ArtifactKind, Bookmark};
use crate::schema::{bookmark_artifacts, bookmarks};

impl From<ArtifactRow> for Artifact {
    fn from(row: ArtifactRow) -> Self {
        Artifact {
            kind: ArtifactKind::from_str(&row.kind).unwrap_or(ArtifactKind::Asset),
            name: row.name,
            content_type: row.content_type,
            blob_hash: row.blob_hash,
            size: row.size.max(0) as u64,
        }
    }
}

fn row_to_bookmark(row: BookmarkRow, artifacts: Vec<ArtifactRow>) -> Bookmark {
    Bookmark {
        id: row.id,
        record_id: row.record_id,
        url: row.url,
        cached_at: parse_datetime_opt(row.cached_at),
        cache_error: row.cache_error,
        created_at: parse_datetime(&row.created_at),
        updated_at: parse_datetime(&row.updated_at),
        artifacts: artifacts.into_iter().map(Artifact::from).collect(),
    }
}

/// A complete snapshot ready to replace a bookmark's artifacts.
#[derive(Debug, Clone)]
pub struct SnapshotCommit {
    /// Artifacts in listing order. Blobs must already be stored.
    pub artifacts: Vec<Artifact>,
    pub cached_at: DateTime<Utc>,
}

/// Diesel-based bookmark repository.
#[derive(Clone)]
pub struct DieselBookmarkRepository {
    pool: SqlitePool,
}

impl DieselBookmarkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new bookmark. Artifacts are not written here.
    pub async fn create(&self, bookmark: &Bookmark) -> Result<(), diesel::result::Error> {
        let bookmark = bookmark.clone();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let cached_at = bookmark.cached_at.map(|dt| dt.to_rfc3339());
            let created_at = bookmark.created_at.to_rfc3339();
            let updated_at = bookmark.updated_at.to_rfc3339();
            diesel::insert_into(bookmarks::table)
                .values(NewBookmark {
                    id: &bookmark.id,
                    record_id: &bookmark.record_id,
                    url: &bookmark.url,
                    cached_at: cached_at.as_deref(),
                    cache_error: bookmark.cache_error.as_deref(),
                    created_at: &created_at,
                    updated_at: &updated_at,
                })
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Get a bookmark with its artifacts.
    pub async fn get(&self, id: &str) -> Result<Option<Bookmark>, diesel::result::Error> {
        let id = id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let Some(row) = bookmarks::table
                .find(&id)
                .first::<BookmarkRow>(conn)
                .optional()?
            else {
                return Ok(None);
            };
            let artifacts = load_artifacts(conn, &row.id)?;
            Ok(Some(row_to_bookmark(row, artifacts)))
        })
        .await
    }

    /// Get the bookmark owned by a source record.
    pub async fn get_by_record(
        &self,
        record_id: &str,
    ) -> Result<Option<Bookmark>, diesel::result::Error> {
        let record_id = record_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let Some(row) = bookmarks::table
                .filter(bookmarks::record_id.eq(&record_id))
                .first::<BookmarkRow>(conn)
                .optional()?
            else {
                return Ok(None);
            };
            let artifacts = load_artifacts(conn, &row.id)?;
            Ok(Some(row_to_bookmark(row, artifacts)))
        })
        .await
    }

    /// Record a failed attempt. The artifact set and `cached_at` are untouched.
    pub async fn record_failure(&self, id: &str, error: &str) -> Result<(), diesel::result::Error> {
        let id = id.to_string();
        let error = error.to_string();
        let updated_at = Utc::now().to_rfc3339();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let rows = diesel::update(bookmarks::table.find(&id))
                .set((
                    bookmarks::cache_error.eq(Some(&error)),
                    bookmarks::updated_at.eq(&updated_at),
                ))
                .execute(conn)?;
            if rows == 0 {
                return Err(diesel::result::Error::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Replace the artifact set, set `cached_at` and clear `cache_error` in
    /// one transaction.
    ///
    /// Returns the blob hashes of the replaced artifacts. Fails with
    /// `NotFound`, changing nothing, if the bookmark no longer exists.
    pub async fn commit_snapshot(
        &self,
        id: &str,
        snapshot: SnapshotCommit,
    ) -> Result<Vec<String>, diesel::result::Error> {
        let id = id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let cached_at = snapshot.cached_at.to_rfc3339();
                let rows = diesel::update(bookmarks::table.find(&id))
                    .set((
                        bookmarks::cached_at.eq(Some(&cached_at)),
                        bookmarks::cache_error.eq(None::<String>),
                        bookmarks::updated_at.eq(&cached_at),
                    ))
                    .execute(conn)?;
                if rows == 0 {
                    return Err(diesel::result::Error::NotFound);
                }

                let replaced: Vec<String> = bookmark_artifacts::table
                    .filter(bookmark_artifacts::bookmark_id.eq(&id))
                    .select(bookmark_artifacts::blob_hash)
                    .load(conn)?;

                diesel::delete(
                    bookmark_artifacts::table.filter(bookmark_artifacts::bookmark_id.eq(&id)),
                )
                .execute(conn)?;

                let new_rows: Vec<NewArtifact> = snapshot
                    .artifacts
                    .iter()
                    .enumerate()
                    .map(|(position, artifact)| NewArtifact {
                        bookmark_id: id.clone(),
                        kind: artifact.kind.as_str().to_string(),
                        name: artifact.name.clone(),
                        content_type: artifact.content_type.clone(),
                        blob_hash: artifact.blob_hash.clone(),
                        size: artifact.size as i64,
                        position: position as i32,
                    })
                    .collect();
                if !new_rows.is_empty() {
                    diesel::insert_into(bookmark_artifacts::table)
                        .values(&new_rows)
                        .execute(conn)?;
                }

                Ok(replaced)
            })
        })
        .await
    }

    /// The subset of `hashes` no artifact row refers to any more.
    pub async fn unreferenced(
        &self,
        hashes: Vec<String>,
    ) -> Result<Vec<String>, diesel::result::Error> {
        if hashes.is_empty() {
            return Ok(hashes);
        }
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let still_used: HashSet<String> = bookmark_artifacts::table
                .filter(bookmark_artifacts::blob_hash.eq_any(&hashes))
                .select(bookmark_artifacts::blob_hash)
                .distinct()
                .load::<String>(conn)?
                .into_iter()
                .collect();

            let mut seen = HashSet::new();
            Ok(hashes
                .into_iter()
                .filter(|h| !still_used.contains(h) && seen.insert(h.clone()))
                .collect())
        })
        .await
    }
}

fn load_artifacts(
    conn: &mut SqliteConnection,
    bookmark_id: &str,
) -> Result<Vec<ArtifactRow>, diesel::result::Error> {
    bookmark_artifacts::table
        .filter(bookmark_artifacts::bookmark_id.eq(bookmark_id))
        .order(bookmark_artifacts::position.asc())
        .load::<ArtifactRow>(conn)
}
