//! Archive lifecycle: fetch, rewrite, capture and commit one bookmark.
//!
//! Each call is one attempt. Attempts for the same bookmark are serialized;
//! attempts for different bookmarks run independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{Settings, DEFAULT_MAX_ASSETS, DEFAULT_MAX_SNAPSHOT_BYTES};
use crate::fetch::{FetchError, FetchedResource, PageFetcher};
use crate::models::{Artifact, ArtifactKind, Bookmark, CacheState, FAVICON_NAME, INDEX_NAME};
use crate::repository::{
    BlobStore, DieselBookmarkRepository, DieselRecordRepository, SnapshotCommit, StorageError,
};
use crate::rewriter::{rewrite, AssetRef, RewriteError};

/// Tuning for archive attempts.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Concurrent asset fetches within one attempt.
    pub asset_concurrency: usize,
    /// Budget for the network and rewrite phase of one attempt.
    pub archive_timeout: Option<Duration>,
    /// Distinct assets captured per snapshot.
    pub max_assets: usize,
    /// Total bytes kept per snapshot. The document is always kept; assets
    /// and the favicon are dropped once they no longer fit.
    pub max_snapshot_bytes: u64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            asset_concurrency: 4,
            archive_timeout: None,
            max_assets: DEFAULT_MAX_ASSETS,
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }
}

impl ArchiveOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            asset_concurrency: settings.asset_concurrency.max(1),
            archive_timeout: settings.archive_timeout(),
            max_assets: settings.max_assets,
            max_snapshot_bytes: settings.max_snapshot_bytes,
        }
    }
}

/// Result of one archive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// A new snapshot was committed.
    Cached {
        artifacts: usize,
        /// Assets that could not be fetched and were left out.
        skipped_assets: usize,
    },
    /// The attempt failed and the error was recorded on the bookmark.
    Failed { error: String },
    /// The attempt failed but an earlier snapshot exists and was kept.
    KeptPrevious { error: String },
    /// Nothing was attempted because the bookmark had already settled.
    Unchanged(CacheState),
}

/// Errors that prevent an attempt from reaching a state transition.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Bookmark not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Archive task aborted: {0}")]
    Aborted(String),
}

impl From<diesel::result::Error> for ArchiveError {
    fn from(e: diesel::result::Error) -> Self {
        ArchiveError::Storage(StorageError::Database(e))
    }
}

/// Primary page failures. The display text becomes the bookmark's cache error.
#[derive(Debug, thiserror::Error)]
enum CaptureError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}

/// One file of a captured snapshot, held in memory until commit.
#[derive(Debug)]
struct CapturedFile {
    kind: ArtifactKind,
    name: String,
    content_type: String,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct CapturedSnapshot {
    /// Document first, then favicon, then assets in document order.
    files: Vec<CapturedFile>,
    skipped_assets: usize,
}

/// Per-bookmark async mutexes. Entries are dropped once nobody holds or
/// waits on them.
#[derive(Clone, Default)]
struct BookmarkLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

struct BookmarkGuard {
    id: String,
    mutex: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl BookmarkLocks {
    async fn lock(&self, id: &str) -> BookmarkGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(id.to_string()).or_default().clone()
        };
        let guard = mutex.clone().lock_owned().await;
        BookmarkGuard {
            id: id.to_string(),
            mutex,
            guard: Some(guard),
            locks: self.inner.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for BookmarkGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.mutex) <= 2 {
            map.remove(&self.id);
        }
    }
}

/// The lifecycle manager.
#[derive(Clone)]
pub struct ArchiveService {
    records: DieselRecordRepository,
    bookmarks: DieselBookmarkRepository,
    blobs: BlobStore,
    fetcher: Arc<dyn PageFetcher>,
    options: ArchiveOptions,
    locks: BookmarkLocks,
}

impl ArchiveService {
    pub fn new(
        records: DieselRecordRepository,
        bookmarks: DieselBookmarkRepository,
        blobs: BlobStore,
        fetcher: Arc<dyn PageFetcher>,
        options: ArchiveOptions,
    ) -> Self {
        Self {
            records,
            bookmarks,
            blobs,
            fetcher,
            options,
            locks: BookmarkLocks::default(),
        }
    }

    /// Run one archive attempt for an owned bookmark.
    pub async fn archive(
        &self,
        owner_id: &str,
        bookmark_id: &str,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        self.run(owner_id, bookmark_id, false).await
    }

    /// Run one attempt only if the bookmark is still pending once the
    /// bookmark lock is held.
    pub async fn archive_pending(
        &self,
        owner_id: &str,
        bookmark_id: &str,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        self.run(owner_id, bookmark_id, true).await
    }

    /// Run [`archive_pending`](Self::archive_pending) on its own task and
    /// wait for it. Dropping the returned future does not cancel the attempt.
    pub async fn archive_pending_detached(
        &self,
        owner_id: &str,
        bookmark_id: &str,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let service = self.clone();
        let owner_id = owner_id.to_string();
        let bookmark_id = bookmark_id.to_string();
        tokio::spawn(async move { service.archive_pending(&owner_id, &bookmark_id).await })
            .await
            .map_err(|e| ArchiveError::Aborted(e.to_string()))?
    }

    /// Same as [`archive`](Self::archive), on its own task.
    pub async fn archive_detached(
        &self,
        owner_id: &str,
        bookmark_id: &str,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let service = self.clone();
        let owner_id = owner_id.to_string();
        let bookmark_id = bookmark_id.to_string();
        tokio::spawn(async move { service.archive(&owner_id, &bookmark_id).await })
            .await
            .map_err(|e| ArchiveError::Aborted(e.to_string()))?
    }

    async fn run(
        &self,
        owner_id: &str,
        bookmark_id: &str,
        only_pending: bool,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let _guard = self.locks.lock(bookmark_id).await;

        let bookmark = self.load_owned(owner_id, bookmark_id).await?;
        if only_pending && !bookmark.is_pending() {
            return Ok(ArchiveOutcome::Unchanged(bookmark.state()));
        }

        info!(
            bookmark_id,
            url = %bookmark.url,
            state = bookmark.state().as_str(),
            "Archiving bookmark"
        );

        let attempt = self.capture(&bookmark);
        let captured = match self.options.archive_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(CaptureError::Fetch(FetchError::Timeout)),
            },
            None => attempt.await,
        };

        match captured {
            Ok(snapshot) => self.commit(&bookmark, snapshot).await,
            Err(e) => self.record_failure(&bookmark, e.to_string()).await,
        }
    }

    async fn load_owned(&self, owner_id: &str, bookmark_id: &str) -> Result<Bookmark, ArchiveError> {
        let not_found = || ArchiveError::NotFound(bookmark_id.to_string());
        let bookmark = self.bookmarks.get(bookmark_id).await?.ok_or_else(not_found)?;
        self.records
            .get_owned(owner_id, &bookmark.record_id)
            .await?
            .ok_or_else(not_found)?;
        Ok(bookmark)
    }

    /// Network and rewrite phase. Nothing is persisted here.
    async fn capture(&self, bookmark: &Bookmark) -> Result<CapturedSnapshot, CaptureError> {
        let page = self.fetcher.fetch(&bookmark.url).await?;

        if !page.is_html() {
            debug!(url = %page.final_url, content_type = ?page.content_type, "Storing non-HTML page verbatim");
            let content_type = page
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string());
            return Ok(CapturedSnapshot {
                files: vec![CapturedFile {
                    kind: ArtifactKind::Document,
                    name: INDEX_NAME.to_string(),
                    content_type,
                    bytes: page.bytes,
                }],
                skipped_assets: 0,
            });
        }

        let rewritten = rewrite(&page.bytes, &page.final_url, self.options.max_assets)?;
        let total_assets = rewritten.assets.len();
        let budget = self
            .options
            .max_snapshot_bytes
            .saturating_sub(rewritten.html.len() as u64);

        let (assets, favicon) = tokio::join!(
            self.fetch_assets(rewritten.assets, budget),
            self.fetch_favicon(&rewritten.favicon_urls),
        );
        let skipped_assets = total_assets - assets.len() + rewritten.omitted_assets;

        let used: u64 = assets.iter().map(|file| file.bytes.len() as u64).sum();
        let favicon = favicon.filter(|file| {
            let fits = used + file.bytes.len() as u64 <= budget;
            if !fits {
                warn!(url = %page.final_url, "Snapshot size limit reached, dropping favicon");
            }
            fits
        });

        let mut files = Vec::with_capacity(assets.len() + 2);
        files.push(CapturedFile {
            kind: ArtifactKind::Document,
            name: INDEX_NAME.to_string(),
            content_type: page
                .content_type
                .unwrap_or_else(|| "text/html; charset=utf-8".to_string()),
            bytes: rewritten.html,
        });
        files.extend(favicon);
        files.extend(assets);

        Ok(CapturedSnapshot {
            files,
            skipped_assets,
        })
    }

    /// Fetch assets with bounded concurrency, keeping document order.
    /// Failed assets are logged and left out, as are assets that no longer
    /// fit in `budget` bytes.
    async fn fetch_assets(&self, assets: Vec<AssetRef>, budget: u64) -> Vec<CapturedFile> {
        let mut fetched = std::pin::pin!(stream::iter(assets)
            .map(|asset| {
                let fetcher = self.fetcher.clone();
                async move {
                    match fetcher.fetch(asset.url.as_str()).await {
                        Ok(resource) => Some(CapturedFile {
                            kind: ArtifactKind::Asset,
                            content_type: asset_content_type(&resource, &asset),
                            name: asset.local_name,
                            bytes: resource.bytes,
                        }),
                        Err(e) => {
                            warn!(url = %asset.url, error = %e, "Skipping asset");
                            None
                        }
                    }
                }
            })
            .buffered(self.options.asset_concurrency.max(1)));

        let mut files = Vec::new();
        let mut remaining = budget;
        while let Some(file) = fetched.next().await {
            let Some(file) = file else {
                continue;
            };
            let size = file.bytes.len() as u64;
            if size > remaining {
                warn!(name = %file.name, size, "Snapshot size limit reached, skipping asset");
                continue;
            }
            remaining -= size;
            files.push(file);
            if remaining == 0 {
                break;
            }
        }
        files
    }

    /// First candidate that answers with something other than HTML.
    async fn fetch_favicon(&self, urls: &[Url]) -> Option<CapturedFile> {
        for url in urls {
            match self.fetcher.fetch(url.as_str()).await {
                // Error pages served with 200 are not icons.
                Ok(resource) if resource.is_html() => {
                    debug!(url = %url, "Favicon response is HTML, ignoring");
                }
                Ok(resource) => {
                    return Some(CapturedFile {
                        kind: ArtifactKind::Favicon,
                        name: FAVICON_NAME.to_string(),
                        content_type: resource
                            .content_type
                            .unwrap_or_else(|| "image/x-icon".to_string()),
                        bytes: resource.bytes,
                    });
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "No favicon");
                }
            }
        }
        None
    }

    /// Stage blobs, then swap the artifact set in one transaction.
    async fn commit(
        &self,
        bookmark: &Bookmark,
        snapshot: CapturedSnapshot,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let stage = self.blobs.stage_guard().await;

        let mut artifacts = Vec::with_capacity(snapshot.files.len());
        for file in &snapshot.files {
            match self.blobs.put(&file.bytes).await {
                Ok(blob_hash) => artifacts.push(Artifact {
                    kind: file.kind,
                    name: file.name.clone(),
                    content_type: file.content_type.clone(),
                    blob_hash,
                    size: file.bytes.len() as u64,
                }),
                Err(e) => {
                    error!(bookmark_id = %bookmark.id, error = %e, "Failed to stage snapshot blob");
                    drop(stage);
                    self.discard_staged(&artifacts).await;
                    return Err(StorageError::Blob(e).into());
                }
            }
        }

        let artifact_count = artifacts.len();
        let staged: Vec<String> = artifacts.iter().map(|a| a.blob_hash.clone()).collect();
        let committed = self
            .bookmarks
            .commit_snapshot(
                &bookmark.id,
                SnapshotCommit {
                    artifacts,
                    cached_at: Utc::now(),
                },
            )
            .await;
        drop(stage);

        let replaced = match committed {
            Ok(replaced) => replaced,
            Err(diesel::result::Error::NotFound) => {
                self.collect_garbage(staged).await;
                return Err(ArchiveError::NotFound(bookmark.id.clone()));
            }
            Err(e) => {
                error!(bookmark_id = %bookmark.id, error = %e, "Failed to commit snapshot");
                self.collect_garbage(staged).await;
                return Err(StorageError::Database(e).into());
            }
        };

        info!(
            bookmark_id = %bookmark.id,
            artifacts = artifact_count,
            skipped_assets = snapshot.skipped_assets,
            "Bookmark cached"
        );
        self.collect_garbage(replaced).await;

        Ok(ArchiveOutcome::Cached {
            artifacts: artifact_count,
            skipped_assets: snapshot.skipped_assets,
        })
    }

    async fn discard_staged(&self, artifacts: &[Artifact]) {
        let hashes = artifacts.iter().map(|a| a.blob_hash.clone()).collect();
        self.collect_garbage(hashes).await;
    }

    async fn record_failure(
        &self,
        bookmark: &Bookmark,
        reason: String,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        if bookmark.is_cached() {
            warn!(
                bookmark_id = %bookmark.id,
                error = %reason,
                "Re-archive failed, keeping existing snapshot"
            );
            return Ok(ArchiveOutcome::KeptPrevious { error: reason });
        }

        match self.bookmarks.record_failure(&bookmark.id, &reason).await {
            Ok(()) => {}
            Err(diesel::result::Error::NotFound) => {
                return Err(ArchiveError::NotFound(bookmark.id.clone()))
            }
            Err(e) => {
                error!(bookmark_id = %bookmark.id, error = %e, "Failed to record archive failure");
                return Err(StorageError::Database(e).into());
            }
        }

        info!(bookmark_id = %bookmark.id, error = %reason, "Bookmark archive failed");
        Ok(ArchiveOutcome::Failed { error: reason })
    }

    /// Remove blobs among `hashes` that no artifact references. Failures are
    /// logged; a leftover blob is harmless.
    pub async fn collect_garbage(&self, hashes: Vec<String>) {
        collect_garbage(&self.bookmarks, &self.blobs, hashes).await;
    }
}

pub(crate) async fn collect_garbage(
    bookmarks: &DieselBookmarkRepository,
    blobs: &BlobStore,
    hashes: Vec<String>,
) {
    if hashes.is_empty() {
        return;
    }
    let _sweep = blobs.sweep_guard().await;

    let orphans = match bookmarks.unreferenced(hashes).await {
        Ok(orphans) => orphans,
        Err(e) => {
            warn!(error = %e, "Could not check blob references");
            return;
        }
    };
    for hash in orphans {
        if let Err(e) = blobs.remove(&hash).await {
            warn!(hash = %hash, error = %e, "Failed to remove unreferenced blob");
        }
    }
}

/// Declared type, else guessed from the local name, else the kind's default.
fn asset_content_type(resource: &FetchedResource, asset: &AssetRef) -> String {
    if let Some(ct) = &resource.content_type {
        return ct.clone();
    }
    mime_guess::from_path(&asset.local_name)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| asset.kind.fallback_content_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    #[tokio::test]
    async fn test_three_artifact_snapshot() {
        let env = TestEnv::new(
            StubFetcher::new()
                .html(
                    "https://a.test/",
                    r#"<html><link rel=stylesheet href="/s.css"><img src="i.png"></html>"#,
                )
                .file("https://a.test/s.css", "text/css", "body{}")
                .file("https://a.test/i.png", "image/png", "PNG"),
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert_eq!(
            outcome,
            ArchiveOutcome::Cached {
                artifacts: 3,
                skipped_assets: 0
            }
        );

        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(stored.is_cached());
        assert!(stored.cache_error.is_none());
        assert_eq!(stored.cached_file_list(), vec!["index.html", "s.css", "i.png"]);

        let index = stored.document().unwrap();
        let html = env.blobs.get(&index.blob_hash).await.unwrap().unwrap();
        let html = String::from_utf8(html).unwrap();
        assert!(html.contains(r#"href="s.css""#));
        assert!(html.contains(r#"src="i.png""#));

        let css = stored.find_artifact("s.css").unwrap();
        assert_eq!(css.content_type, "text/css");
        assert_eq!(env.blobs.get(&css.blob_hash).await.unwrap().unwrap(), b"body{}");
    }

    #[tokio::test]
    async fn test_primary_timeout_marks_failed() {
        let env = TestEnv::new(StubFetcher::new().error("https://slow.test/", FetchError::Timeout)).await;
        let bookmark = env.bookmark("alice", "https://slow.test/").await;

        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert_eq!(
            outcome,
            ArchiveOutcome::Failed {
                error: "Request timed out".to_string()
            }
        );

        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(stored.is_failed());
        assert!(stored.cached_at.is_none());
        assert!(stored.artifacts.is_empty());
        assert_eq!(stored.cache_error.as_deref(), Some("Request timed out"));
    }

    #[tokio::test]
    async fn test_broken_asset_is_skipped() {
        let env = TestEnv::new(
            StubFetcher::new()
                .html("https://a.test/", r#"<img src="/ok.png"><img src="/gone.png">"#)
                .file("https://a.test/ok.png", "image/png", "OK")
                .error("https://a.test/gone.png", FetchError::HttpStatus(404)),
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert_eq!(
            outcome,
            ArchiveOutcome::Cached {
                artifacts: 2,
                skipped_assets: 1
            }
        );

        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(stored.is_cached());
        assert_eq!(stored.cached_file_list(), vec!["index.html", "ok.png"]);
    }

    #[tokio::test]
    async fn test_retry_clears_error() {
        let fetcher = StubFetcher::new().error("https://a.test/", FetchError::HttpStatus(503));
        let env = TestEnv::new(fetcher.clone()).await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert!(env.bookmarks.get(&bookmark.id).await.unwrap().unwrap().is_failed());

        fetcher.set_html("https://a.test/", "<p>back</p>");
        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Cached { .. }));

        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(stored.is_cached());
        assert!(stored.cache_error.is_none());
    }

    #[tokio::test]
    async fn test_rearchive_is_idempotent() {
        let env = TestEnv::new(
            StubFetcher::new()
                .html("https://a.test/", r#"<script src="app.js"></script>"#)
                .file("https://a.test/app.js", "text/javascript", "run()"),
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let first = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let second = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();

        assert_eq!(first.artifacts, second.artifacts);
        for artifact in &second.artifacts {
            assert!(env.blobs.contains(&artifact.blob_hash).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_failed_rearchive_keeps_snapshot() {
        let fetcher = StubFetcher::new().html("https://a.test/", "<p>v1</p>");
        let env = TestEnv::new(fetcher.clone()).await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;
        env.archive.archive("alice", &bookmark.id).await.unwrap();

        fetcher.set_error("https://a.test/", FetchError::Unreachable("dns".to_string()));
        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert!(matches!(outcome, ArchiveOutcome::KeptPrevious { .. }));

        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(stored.is_cached());
        assert!(stored.cache_error.is_none());
    }

    #[tokio::test]
    async fn test_replaced_blobs_are_collected() {
        let fetcher = StubFetcher::new().html("https://a.test/", "<p>v1</p>");
        let env = TestEnv::new(fetcher.clone()).await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let old_hash = env
            .bookmarks
            .get(&bookmark.id)
            .await
            .unwrap()
            .unwrap()
            .document()
            .unwrap()
            .blob_hash
            .clone();

        fetcher.set_html("https://a.test/", "<p>v2</p>");
        env.archive.archive("alice", &bookmark.id).await.unwrap();

        assert!(!env.blobs.contains(&old_hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_html_stored_verbatim() {
        let env = TestEnv::new(StubFetcher::new().file(
            "https://a.test/paper.pdf",
            "application/pdf",
            "%PDF-1.7",
        ))
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/paper.pdf").await;

        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(stored.cached_file_list(), vec!["index.html"]);
        assert_eq!(stored.document().unwrap().content_type, "application/pdf");
    }

    #[tokio::test]
    async fn test_declared_favicon_captured() {
        let env = TestEnv::new(
            StubFetcher::new()
                .html("https://a.test/", r#"<link rel="icon" href="/img/icon.png">"#)
                .file("https://a.test/img/icon.png", "image/png", "ICON"),
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(stored.cached_file_list(), vec!["index.html", "favicon.ico"]);
        assert_eq!(stored.favicon().unwrap().content_type, "image/png");
    }

    #[tokio::test]
    async fn test_html_favicon_treated_as_absent() {
        let env = TestEnv::new(
            StubFetcher::new()
                .html("https://a.test/", "<p>hi</p>")
                .html("https://a.test/favicon.ico", "<html>not found</html>"),
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(stored.favicon().is_none());
    }

    #[tokio::test]
    async fn test_other_owner_cannot_archive() {
        let env = TestEnv::new(StubFetcher::new().html("https://a.test/", "<p>hi</p>")).await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let err = env.archive.archive("mallory", &bookmark.id).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
        assert!(env.bookmarks.get(&bookmark.id).await.unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_archive_pending_skips_settled() {
        let env = TestEnv::new(StubFetcher::new().html("https://a.test/", "<p>hi</p>")).await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let first = env.archive.archive_pending_detached("alice", &bookmark.id).await.unwrap();
        assert!(matches!(first, ArchiveOutcome::Cached { .. }));

        let second = env.archive.archive_pending("alice", &bookmark.id).await.unwrap();
        assert_eq!(second, ArchiveOutcome::Unchanged(CacheState::Cached));
    }

    #[tokio::test]
    async fn test_archive_timeout_bounds_attempt() {
        let fetcher = StubFetcher::new()
            .html("https://a.test/", "<p>hi</p>")
            .with_delay(Duration::from_secs(5));
        let env = TestEnv::with_options(
            fetcher,
            ArchiveOptions {
                asset_concurrency: 2,
                archive_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert_eq!(
            outcome,
            ArchiveOutcome::Failed {
                error: "Request timed out".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_storage_error_keeps_cached_snapshot() {
        let fetcher = StubFetcher::new()
            .html("https://a.test/", r#"<img src="/a.png">"#)
            .file("https://a.test/a.png", "image/png", "A");
        let env = TestEnv::new(fetcher.clone()).await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;
        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let before = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();

        fetcher.set_html("https://a.test/", "<p>v2</p>");
        let broken = env.archive_with_blobs(fetcher, env.broken_blobs());
        let err = broken.archive("alice", &bookmark.id).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Storage(StorageError::Blob(_))));

        let after = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(after.is_cached());
        assert!(after.cache_error.is_none());
        assert_eq!(after.cached_at, before.cached_at);
        assert_eq!(after.artifacts, before.artifacts);
        for artifact in &after.artifacts {
            assert!(env.blobs.contains(&artifact.blob_hash).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_storage_error_leaves_pending() {
        let fetcher = StubFetcher::new().html("https://a.test/", "<p>hi</p>");
        let env = TestEnv::new(fetcher.clone()).await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let broken = env.archive_with_blobs(fetcher, env.broken_blobs());
        let err = broken.archive("alice", &bookmark.id).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Storage(_)));

        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert!(stored.is_pending());
        assert!(stored.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_asset_count_limit() {
        let html: String = (0..10).map(|i| format!(r#"<img src="/i{i}.png">"#)).collect();
        let mut fetcher = StubFetcher::new().html("https://a.test/", &html);
        for i in 0..10 {
            fetcher = fetcher.file(&format!("https://a.test/i{i}.png"), "image/png", "P");
        }
        let env = TestEnv::with_options(
            fetcher,
            ArchiveOptions {
                max_assets: 4,
                ..Default::default()
            },
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert_eq!(
            outcome,
            ArchiveOutcome::Cached {
                artifacts: 5,
                skipped_assets: 6
            }
        );
        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(stored.assets().count(), 4);
    }

    #[tokio::test]
    async fn test_snapshot_byte_limit() {
        let page = r#"<img src="/big.png"><img src="/small.png">"#;
        let env = TestEnv::with_options(
            StubFetcher::new()
                .html("https://a.test/", page)
                .file("https://a.test/big.png", "image/png", &"B".repeat(500))
                .file("https://a.test/small.png", "image/png", "S")
                .file("https://a.test/favicon.ico", "image/x-icon", &"F".repeat(100)),
            ArchiveOptions {
                max_snapshot_bytes: page.len() as u64 + 50,
                ..Default::default()
            },
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let outcome = env.archive.archive("alice", &bookmark.id).await.unwrap();
        assert_eq!(
            outcome,
            ArchiveOutcome::Cached {
                artifacts: 2,
                skipped_assets: 1
            }
        );
        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(stored.cached_file_list(), vec!["index.html", "small.png"]);
    }

    #[tokio::test]
    async fn test_declared_favicon_falls_back_to_root() {
        let env = TestEnv::new(
            StubFetcher::new()
                .html("https://a.test/", r#"<link rel="icon" href="/gone.png">"#)
                .error("https://a.test/gone.png", FetchError::HttpStatus(404))
                .file("https://a.test/favicon.ico", "image/x-icon", "ICO"),
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        env.archive.archive("alice", &bookmark.id).await.unwrap();
        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        let favicon = stored.favicon().unwrap();
        assert_eq!(favicon.content_type, "image/x-icon");
        assert_eq!(env.blobs.get(&favicon.blob_hash).await.unwrap().unwrap(), b"ICO");
    }

    #[tokio::test]
    async fn test_concurrent_attempts_serialize() {
        let env = TestEnv::new(
            StubFetcher::new()
                .html("https://a.test/", r#"<img src="x.png">"#)
                .file("https://a.test/x.png", "image/png", "X")
                .with_delay(Duration::from_millis(20)),
        )
        .await;
        let bookmark = env.bookmark("alice", "https://a.test/").await;

        let (a, b) = tokio::join!(
            env.archive.archive("alice", &bookmark.id),
            env.archive.archive("alice", &bookmark.id),
        );
        assert!(matches!(a.unwrap(), ArchiveOutcome::Cached { .. }));
        assert!(matches!(b.unwrap(), ArchiveOutcome::Cached { .. }));

        let stored = env.bookmarks.get(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(stored.cached_file_list(), vec!["index.html", "x.png"]);
        assert_eq!(env.archive.locks.len(), 0);
    }
}
