//! Shared fixtures for service tests: a canned fetcher and a temp database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;

use super::archive::{ArchiveOptions, ArchiveService};
use crate::fetch::{FetchError, FetchedResource, PageFetcher};
use crate::models::{Bookmark, Record};
use crate::repository::{
    create_diesel_pool, run_migrations, BlobStore, DieselBookmarkRepository,
    DieselRecordRepository, SqlitePool,
};

/// Serves canned responses keyed by URL. Unknown URLs are unreachable, which
/// also stands in for the network being down.
#[derive(Clone, Default)]
pub struct StubFetcher {
    responses: Arc<Mutex<HashMap<String, Result<FetchedResource, FetchError>>>>,
    delay: Option<Duration>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn html(self, url: &str, body: &str) -> Self {
        self.set_html(url, body);
        self
    }

    pub fn file(self, url: &str, content_type: &str, body: &str) -> Self {
        self.insert(url, Ok(resource(url, Some(content_type), body)));
        self
    }

    pub fn error(self, url: &str, error: FetchError) -> Self {
        self.set_error(url, error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_html(&self, url: &str, body: &str) {
        self.insert(url, Ok(resource(url, Some("text/html; charset=utf-8"), body)));
    }

    pub fn set_error(&self, url: &str, error: FetchError) {
        self.insert(url, Err(error));
    }

    /// Forget every canned response.
    pub fn go_offline(&self) {
        self.responses.lock().unwrap().clear();
    }

    fn insert(&self, url: &str, response: Result<FetchedResource, FetchError>) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }
}

fn resource(url: &str, content_type: Option<&str>, body: &str) -> FetchedResource {
    FetchedResource {
        bytes: body.as_bytes().to_vec(),
        content_type: content_type.map(str::to_string),
        final_url: Url::parse(url).unwrap(),
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Unreachable(format!("no route to {url}"))))
    }
}

/// Temp database, blob store and archive service wired together.
pub struct TestEnv {
    pub pool: SqlitePool,
    pub records: DieselRecordRepository,
    pub bookmarks: DieselBookmarkRepository,
    pub blobs: BlobStore,
    pub archive: ArchiveService,
    _dir: TempDir,
}

impl TestEnv {
    pub async fn new(fetcher: StubFetcher) -> Self {
        Self::with_options(fetcher, ArchiveOptions::default()).await
    }

    pub async fn with_options(fetcher: StubFetcher, options: ArchiveOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_diesel_pool(&dir.path().join("test.db")).unwrap();
        run_migrations(&pool).await.unwrap();

        let records = DieselRecordRepository::new(pool.clone());
        let bookmarks = DieselBookmarkRepository::new(pool.clone());
        let blobs = BlobStore::new(dir.path().join("blobs"));
        let archive = ArchiveService::new(
            records.clone(),
            bookmarks.clone(),
            blobs.clone(),
            Arc::new(fetcher),
            options,
        );

        Self {
            pool,
            records,
            bookmarks,
            blobs,
            archive,
            _dir: dir,
        }
    }

    /// Archive service over the same database with a different blob store.
    pub fn archive_with_blobs(&self, fetcher: StubFetcher, blobs: BlobStore) -> ArchiveService {
        ArchiveService::new(
            self.records.clone(),
            self.bookmarks.clone(),
            blobs,
            Arc::new(fetcher),
            ArchiveOptions::default(),
        )
    }

    /// Blob store rooted at a regular file, so every write fails.
    pub fn broken_blobs(&self) -> BlobStore {
        let root = self._dir.path().join("not-a-directory");
        std::fs::write(&root, b"x").unwrap();
        BlobStore::new(root)
    }

    /// Create a `.url` record and its pending bookmark.
    pub async fn bookmark(&self, owner: &str, url: &str) -> Bookmark {
        let record = Record::new(
            owner.to_string(),
            format!("{}.url", uuid::Uuid::new_v4()),
            "application/internet-shortcut".to_string(),
            crate::models::shortcut_file_content(url).into_bytes(),
        );
        self.records.create(&record).await.unwrap();

        let bookmark = Bookmark::new(record.id.clone(), url.to_string());
        self.bookmarks.create(&bookmark).await.unwrap();
        bookmark
    }
}
