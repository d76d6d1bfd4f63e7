//! Read-only access to captured snapshots.
//!
//! Everything here is answered from the database and blob store; no code
//! path reaches the network. Lookups are scoped to the owner, and anything
//! the owner cannot see is reported as not found.

use tracing::error;

use crate::filename::{ensure_url_safe, normalize_filename};
use crate::models::Bookmark;
use crate::repository::{BlobStore, DieselBookmarkRepository, DieselRecordRepository, StorageError};
use crate::rewriter::extract_page_text;

/// Bytes of one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedFile {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<diesel::result::Error> for RetrievalError {
    fn from(e: diesel::result::Error) -> Self {
        RetrievalError::Storage(StorageError::Database(e))
    }
}

/// Serves previously captured snapshot bytes.
#[derive(Clone)]
pub struct RetrievalGuard {
    records: DieselRecordRepository,
    bookmarks: DieselBookmarkRepository,
    blobs: BlobStore,
}

impl RetrievalGuard {
    pub fn new(
        records: DieselRecordRepository,
        bookmarks: DieselBookmarkRepository,
        blobs: BlobStore,
    ) -> Self {
        Self {
            records,
            bookmarks,
            blobs,
        }
    }

    /// The owner's bookmark for `record_id`, only if it holds a snapshot.
    async fn cached_bookmark(&self, owner_id: &str, record_id: &str) -> Result<Bookmark, RetrievalError> {
        self.records
            .get_owned(owner_id, record_id)
            .await?
            .ok_or(RetrievalError::NotFound)?;
        self.bookmarks
            .get_by_record(record_id)
            .await?
            .filter(Bookmark::is_cached)
            .ok_or(RetrievalError::NotFound)
    }

    /// One artifact by retrieval name. `index.html` and `favicon.ico` are
    /// the document and favicon; anything else must exactly match an asset.
    pub async fn fetch_artifact(
        &self,
        owner_id: &str,
        record_id: &str,
        name: &str,
    ) -> Result<RetrievedFile, RetrievalError> {
        let bookmark = self.cached_bookmark(owner_id, record_id).await?;
        let artifact = bookmark.find_artifact(name).ok_or(RetrievalError::NotFound)?;

        match self.blobs.get(&artifact.blob_hash).await.map_err(StorageError::Blob)? {
            Some(bytes) => Ok(RetrievedFile {
                content_type: artifact.content_type.clone(),
                bytes,
            }),
            None => {
                error!(
                    bookmark_id = %bookmark.id,
                    name,
                    hash = %artifact.blob_hash,
                    "Artifact blob is missing"
                );
                Err(StorageError::Blob(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("blob {} missing", artifact.blob_hash),
                ))
                .into())
            }
        }
    }

    /// Names of the stored artifacts: document, favicon if any, then assets.
    pub async fn list(&self, owner_id: &str, record_id: &str) -> Result<Vec<String>, RetrievalError> {
        Ok(self.cached_bookmark(owner_id, record_id).await?.cached_file_list())
    }

    /// Visible text of the cached document, for search.
    pub async fn page_text(
        &self,
        owner_id: &str,
        record_id: &str,
    ) -> Result<Option<String>, RetrievalError> {
        let page = match self.fetch_artifact(owner_id, record_id, crate::models::INDEX_NAME).await {
            Ok(page) => page,
            Err(RetrievalError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let is_html = page.content_type.to_ascii_lowercase().contains("html");
        Ok(if is_html { extract_page_text(&page.bytes) } else { None })
    }

    /// Record id for one of the owner's filenames, as listed by
    /// [`cached_index`](Self::cached_index). Decoded and encoded spellings
    /// resolve to the same record.
    pub async fn resolve_filename(
        &self,
        owner_id: &str,
        filename: &str,
    ) -> Result<String, RetrievalError> {
        let record = self
            .records
            .get_owned_by_filename(owner_id, &normalize_filename(filename))
            .await?
            .ok_or(RetrievalError::NotFound)?;
        Ok(record.id)
    }

    /// URL-safe filenames of the owner's records that have a snapshot, sorted.
    pub async fn cached_index(&self, owner_id: &str) -> Result<Vec<String>, RetrievalError> {
        let mut names: Vec<String> = self
            .records
            .cached_filenames(owner_id)
            .await?
            .iter()
            .map(|name| ensure_url_safe(name).into_owned())
            .collect();
        names.sort();
        Ok(names)
    }
}
