//! Domain models for records, bookmarks and snapshot artifacts.

mod bookmark;
mod record;

pub use bookmark::{Artifact, ArtifactKind, Bookmark, CacheState, FAVICON_NAME, INDEX_NAME};
pub use record::{extract_shortcut_url, generate_filename, shortcut_file_content, Record};
