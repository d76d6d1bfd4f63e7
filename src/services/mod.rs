//! Service layer for pagevault business logic.
//!
//! This module contains domain logic separated from transport concerns.
//! Services are used by both the CLI and the web server.

pub mod archive;
pub mod queue;
pub mod records;
pub mod retrieval;

#[cfg(test)]
pub(crate) mod test_support;

pub use archive::{ArchiveError, ArchiveOptions, ArchiveOutcome, ArchiveService};
pub use queue::{ArchiveJob, ArchiveQueue, QueueClosed};
pub use records::{RecordError, RecordService};
pub use retrieval::{RetrievalError, RetrievalGuard, RetrievedFile};

use std::sync::Arc;

use crate::config::Settings;
use crate::fetch::{FetcherConfig, HttpFetcher, PageFetcher};
use crate::repository::{BlobStore, DieselBookmarkRepository, DieselRecordRepository, SqlitePool};

/// All services over one database and blob store.
#[derive(Clone)]
pub struct Services {
    pub records: RecordService,
    pub retrieval: RetrievalGuard,
    pub archive: ArchiveService,
}

impl Services {
    /// Wire services with the given fetcher. No queue is attached.
    pub fn new(
        pool: SqlitePool,
        blobs: BlobStore,
        fetcher: Arc<dyn PageFetcher>,
        options: ArchiveOptions,
    ) -> Self {
        let records = DieselRecordRepository::new(pool.clone());
        let bookmarks = DieselBookmarkRepository::new(pool);
        let archive = ArchiveService::new(
            records.clone(),
            bookmarks.clone(),
            blobs.clone(),
            fetcher,
            options,
        );

        Self {
            records: RecordService::new(records.clone(), bookmarks.clone(), blobs.clone(), archive.clone()),
            retrieval: RetrievalGuard::new(records, bookmarks, blobs),
            archive,
        }
    }

    /// Wire services with an HTTP fetcher configured from `settings`.
    pub fn from_settings(
        settings: &Settings,
        pool: SqlitePool,
        blobs: BlobStore,
    ) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(FetcherConfig::from_settings(settings))?;
        Ok(Self::new(
            pool,
            blobs,
            Arc::new(fetcher),
            ArchiveOptions::from_settings(settings),
        ))
    }

    /// Attach a background queue for newly created bookmarks.
    pub fn with_queue(mut self, queue: ArchiveQueue) -> Self {
        self.records = self.records.with_queue(queue);
        self
    }
}
