//! Source records: the uploaded files that own bookmarks.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::filename::normalize_filename;

/// An uploaded file owned by one user.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub owner_id: String,
    /// URL-encoded display filename.
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Create a record. The filename is stored in its URL-encoded form.
    pub fn new(owner_id: String, filename: String, content_type: String, content: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            filename: normalize_filename(&filename),
            content_type,
            content,
            created_at: Utc::now(),
        }
    }

    /// Whether this record is an internet shortcut (`.url`) file.
    pub fn is_bookmark_file(&self) -> bool {
        self.filename.to_ascii_lowercase().ends_with(".url")
    }

    /// URL stored in a shortcut file, if any.
    pub fn shortcut_url(&self) -> Option<String> {
        if !self.is_bookmark_file() {
            return None;
        }
        extract_shortcut_url(&self.content)
    }
}

/// Extract the target from `.url` shortcut content (`URL=<value>` line, trimmed).
pub fn extract_shortcut_url(content: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(content);
    text.lines()
        .filter_map(|line| line.trim_start().strip_prefix("URL="))
        .map(str::trim)
        .find(|url| !url.is_empty())
        .map(str::to_string)
}

/// Body of a shortcut file pointing at `url`.
pub fn shortcut_file_content(url: &str) -> String {
    format!("[InternetShortcut]\nURL={url}\n")
}

/// Timestamped filename for a new upload.
///
/// With `with_nanos` the nanosecond component is appended, used when the
/// second-resolution name already exists for the owner.
pub fn generate_filename(original_name: &str, now: DateTime<Utc>, with_nanos: bool) -> String {
    let timestamp = now.format("%Y-%m-%dT%H%M%S");
    if with_nanos {
        format!("{timestamp}_{:09}-{original_name}", now.timestamp_subsec_nanos())
    } else {
        format!("{timestamp}-{original_name}")
    }
}
