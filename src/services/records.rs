//! Source records and the bookmarks they own.

use chrono::Utc;
use tracing::{error, info, warn};
use url::Url;

use super::archive::{collect_garbage, ArchiveError, ArchiveService};
use super::queue::ArchiveQueue;
use crate::models::{generate_filename, shortcut_file_content, Bookmark, Record};
use crate::repository::{BlobStore, DieselBookmarkRepository, DieselRecordRepository, StorageError};

const SHORTCUT_NAME: &str = "bookmark.url";
const SHORTCUT_CONTENT_TYPE: &str = "application/internet-shortcut";

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Not found")]
    NotFound,

    #[error("Record is not a bookmark")]
    NotABookmark,

    #[error("Invalid bookmark URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<diesel::result::Error> for RecordError {
    fn from(e: diesel::result::Error) -> Self {
        RecordError::Storage(StorageError::Database(e))
    }
}

/// Creates, resolves and deletes owner records and their bookmarks.
#[derive(Clone)]
pub struct RecordService {
    records: DieselRecordRepository,
    bookmarks: DieselBookmarkRepository,
    blobs: BlobStore,
    archive: ArchiveService,
    queue: Option<ArchiveQueue>,
}

impl RecordService {
    pub fn new(
        records: DieselRecordRepository,
        bookmarks: DieselBookmarkRepository,
        blobs: BlobStore,
        archive: ArchiveService,
    ) -> Self {
        Self {
            records,
            bookmarks,
            blobs,
            archive,
            queue: None,
        }
    }

    /// Submit newly created bookmarks to `queue`.
    pub fn with_queue(mut self, queue: ArchiveQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn archive(&self) -> &ArchiveService {
        &self.archive
    }

    /// Store a `.url` shortcut record for `url` and create its pending
    /// bookmark. With a queue attached the bookmark is submitted for archiving.
    pub async fn create_bookmark(
        &self,
        owner_id: &str,
        url: &str,
    ) -> Result<(Record, Bookmark), RecordError> {
        let url = url.trim();
        let parsed = Url::parse(url).map_err(|e| RecordError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
            return Err(RecordError::InvalidUrl(url.to_string()));
        }

        let now = Utc::now();
        let mut filename = generate_filename(SHORTCUT_NAME, now, false);
        if self.records.filename_exists(owner_id, &filename).await? {
            filename = generate_filename(SHORTCUT_NAME, now, true);
        }

        let record = Record::new(
            owner_id.to_string(),
            filename,
            SHORTCUT_CONTENT_TYPE.to_string(),
            shortcut_file_content(url).into_bytes(),
        );
        self.records.create(&record).await?;

        let bookmark = Bookmark::new(record.id.clone(), url.to_string());
        self.bookmarks.create(&bookmark).await?;
        info!(record_id = %record.id, bookmark_id = %bookmark.id, url, "Created bookmark");

        if let Some(queue) = &self.queue {
            if let Err(e) = queue.submit(owner_id, &bookmark.id) {
                warn!(bookmark_id = %bookmark.id, error = %e, "Could not queue archive");
            }
        }

        Ok((record, bookmark))
    }

    /// The bookmark for an owned record, created from the shortcut content
    /// when the record is a `.url` file without one.
    pub async fn ensure_bookmark(&self, owner_id: &str, record_id: &str) -> Result<Bookmark, RecordError> {
        let record = self
            .records
            .get_owned(owner_id, record_id)
            .await?
            .ok_or(RecordError::NotFound)?;

        if let Some(bookmark) = self.bookmarks.get_by_record(&record.id).await? {
            return Ok(bookmark);
        }

        let url = record.shortcut_url().ok_or(RecordError::NotABookmark)?;
        let bookmark = Bookmark::new(record.id.clone(), url);
        if let Err(e) = self.bookmarks.create(&bookmark).await {
            // Lost a race with a concurrent request creating the same bookmark.
            return match self.bookmarks.get_by_record(&record.id).await? {
                Some(existing) => Ok(existing),
                None => Err(e.into()),
            };
        }
        info!(record_id = %record.id, bookmark_id = %bookmark.id, "Created bookmark from shortcut");
        Ok(bookmark)
    }

    /// Current bookmark state. A pending bookmark gets one synchronous
    /// attempt first. Storage failures during the attempt leave it pending.
    pub async fn cache_status(&self, owner_id: &str, record_id: &str) -> Result<Bookmark, RecordError> {
        let bookmark = self.ensure_bookmark(owner_id, record_id).await?;
        if !bookmark.is_pending() {
            return Ok(bookmark);
        }

        match self.archive.archive_pending_detached(owner_id, &bookmark.id).await {
            Ok(_) => {}
            Err(ArchiveError::NotFound(_)) => return Err(RecordError::NotFound),
            Err(e) => {
                error!(bookmark_id = %bookmark.id, error = %e, "Archive attempt did not complete");
            }
        }

        self.bookmarks
            .get(&bookmark.id)
            .await?
            .ok_or(RecordError::NotFound)
    }

    /// Delete an owned record with its bookmark and snapshot.
    pub async fn delete(&self, owner_id: &str, record_id: &str) -> Result<(), RecordError> {
        let hashes = self
            .records
            .delete_owned(owner_id, record_id)
            .await?
            .ok_or(RecordError::NotFound)?;
        info!(record_id, artifacts = hashes.len(), "Deleted record");
        collect_garbage(&self.bookmarks, &self.blobs, hashes).await;
        Ok(())
    }
}
