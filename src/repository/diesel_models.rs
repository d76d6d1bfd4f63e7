//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.
//! Timestamps are stored as RFC 3339 text.

use diesel::prelude::*;

use crate::schema;

/// Source record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RecordRow {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
    pub created_at: String,
}

/// New source record for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::records)]
pub struct NewRecord<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub filename: &'a str,
    pub content_type: &'a str,
    pub content: &'a [u8],
    pub created_at: &'a str,
}

/// Bookmark record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::bookmarks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BookmarkRow {
    pub id: String,
    pub record_id: String,
    pub url: String,
    pub cached_at: Option<String>,
    pub cache_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New bookmark for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::bookmarks)]
pub struct NewBookmark<'a> {
    pub id: &'a str,
    pub record_id: &'a str,
    pub url: &'a str,
    pub cached_at: Option<&'a str>,
    pub cache_error: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Snapshot artifact record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::bookmark_artifacts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ArtifactRow {
    pub id: i32,
    pub bookmark_id: String,
    pub kind: String,
    pub name: String,
    pub content_type: String,
    pub blob_hash: String,
    pub size: i64,
    pub position: i32,
}

/// New artifact for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::bookmark_artifacts)]
pub struct NewArtifact {
    pub bookmark_id: String,
    pub kind: String,
    pub name: String,
    pub content_type: String,
    pub blob_hash: String,
    pub size: i64,
    pub position: i32,
}
