//! Bookmark caching lifecycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Retrieval name of the primary document.
pub const INDEX_NAME: &str = "index.html";
/// Retrieval name of the favicon.
pub const FAVICON_NAME: &str = "favicon.ico";

/// Caching state derived from the two lifecycle fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Never attempted, or attempt still running.
    Pending,
    /// Snapshot present.
    Cached,
    /// Last attempt failed.
    Failed,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cached => "cached",
            Self::Failed => "failed",
        }
    }
}

/// Class of a stored snapshot artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// The rewritten primary HTML document.
    Document,
    Favicon,
    /// Stylesheet, script or image referenced by the document.
    Asset,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Favicon => "favicon",
            Self::Asset => "asset",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "favicon" => Some(Self::Favicon),
            "asset" => Some(Self::Asset),
            _ => None,
        }
    }
}

/// Metadata for one stored artifact. Bytes live in the blob store under `blob_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub content_type: String,
    pub blob_hash: String,
    pub size: u64,
}

/// A bookmark tracks one archivable URL and its caching lifecycle.
#[derive(Debug, Clone)]
pub struct Bookmark {
    pub id: String,
    /// Owning source record.
    pub record_id: String,
    pub url: String,
    pub cached_at: Option<DateTime<Utc>>,
    pub cache_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Artifacts in listing order: document, favicon, then assets.
    pub artifacts: Vec<Artifact>,
}

impl Bookmark {
    /// Create a new pending bookmark.
    pub fn new(record_id: String, url: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            record_id,
            url,
            cached_at: None,
            cache_error: None,
            created_at: now,
            updated_at: now,
            artifacts: Vec::new(),
        }
    }

    /// Cached iff `cached_at` is set and the primary document is stored.
    pub fn is_cached(&self) -> bool {
        self.cached_at.is_some() && self.document().is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.cache_error.is_some()
    }

    pub fn is_pending(&self) -> bool {
        !self.is_cached() && !self.is_failed()
    }

    /// Current lifecycle state. A cached snapshot wins over a stale error.
    pub fn state(&self) -> CacheState {
        if self.is_cached() {
            CacheState::Cached
        } else if self.is_failed() {
            CacheState::Failed
        } else {
            CacheState::Pending
        }
    }

    pub fn document(&self) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|a| a.kind == ArtifactKind::Document)
    }

    pub fn favicon(&self) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == ArtifactKind::Favicon)
    }

    pub fn assets(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| a.kind == ArtifactKind::Asset)
    }

    /// Resolve a retrieval name to an artifact.
    ///
    /// `index.html` and `favicon.ico` address the dedicated artifacts; anything
    /// else must match an asset name exactly.
    pub fn find_artifact(&self, name: &str) -> Option<&Artifact> {
        match name {
            INDEX_NAME => self.document(),
            FAVICON_NAME => self.favicon(),
            _ => self.assets().find(|a| a.name == name),
        }
    }

    /// Names of all stored artifacts, in listing order.
    pub fn cached_file_list(&self) -> Vec<String> {
        let mut files = Vec::with_capacity(self.artifacts.len());
        if self.document().is_some() {
            files.push(INDEX_NAME.to_string());
        }
        if self.favicon().is_some() {
            files.push(FAVICON_NAME.to_string());
        }
        files.extend(self.assets().map(|a| a.name.clone()));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(kind: ArtifactKind, name: &str) -> Artifact {
        Artifact {
            kind,
            name: name.to_string(),
            content_type: "application/octet-stream".to_string(),
            blob_hash: "00".repeat(32),
            size: 1,
        }
    }

    #[test]
    fn test_new_bookmark_is_pending() {
        let bookmark = Bookmark::new("rec-1".to_string(), "https://example.com".to_string());
        assert_eq!(bookmark.state(), CacheState::Pending);
        assert!(bookmark.cached_file_list().is_empty());
    }

    #[test]
    fn test_cached_requires_document() {
        let mut bookmark = Bookmark::new("rec-1".to_string(), "https://example.com".to_string());
        bookmark.cached_at = Some(Utc::now());
        assert!(!bookmark.is_cached());

        bookmark.artifacts.push(artifact(ArtifactKind::Document, INDEX_NAME));
        assert!(bookmark.is_cached());
        assert_eq!(bookmark.state(), CacheState::Cached);
    }

    #[test]
    fn test_document_without_timestamp_is_not_cached() {
        let mut bookmark = Bookmark::new("rec-1".to_string(), "https://example.com".to_string());
        bookmark.artifacts.push(artifact(ArtifactKind::Document, INDEX_NAME));
        assert!(!bookmark.is_cached());
        assert!(bookmark.is_pending());
    }

    #[test]
    fn test_failed_state() {
        let mut bookmark = Bookmark::new("rec-1".to_string(), "https://example.com".to_string());
        bookmark.cache_error = Some("HTTP 500".to_string());
        assert_eq!(bookmark.state(), CacheState::Failed);
    }

    #[test]
    fn test_file_list_order_and_lookup() {
        let mut bookmark = Bookmark::new("rec-1".to_string(), "https://example.com".to_string());
        bookmark.artifacts = vec![
            artifact(ArtifactKind::Document, INDEX_NAME),
            artifact(ArtifactKind::Favicon, FAVICON_NAME),
            artifact(ArtifactKind::Asset, "s.css"),
            artifact(ArtifactKind::Asset, "i.png"),
        ];

        assert_eq!(
            bookmark.cached_file_list(),
            vec!["index.html", "favicon.ico", "s.css", "i.png"]
        );
        assert_eq!(bookmark.find_artifact("s.css").map(|a| a.kind), Some(ArtifactKind::Asset));
        assert_eq!(
            bookmark.find_artifact("favicon.ico").map(|a| a.kind),
            Some(ArtifactKind::Favicon)
        );
        assert!(bookmark.find_artifact("../../etc/passwd").is_none());
    }
}
