//! Snapshot-local filenames for captured assets.

use std::collections::{HashMap, HashSet};

use url::Url;

use super::AssetKind;
use crate::models::{FAVICON_NAME, INDEX_NAME};

/// Names with a fixed meaning under a snapshot's URL space.
const RESERVED: &[&str] = &[INDEX_NAME, FAVICON_NAME, "status"];

/// Longest local name kept before truncating the stem.
const MAX_NAME_LEN: usize = 96;

/// Assigns unique local names within one snapshot.
///
/// Repeated references to the same URL share one name; different URLs that
/// would collide get `-1`, `-2`, ... suffixes before the extension.
#[derive(Debug)]
pub struct LocalNames {
    by_url: HashMap<String, String>,
    taken: HashSet<String>,
}

impl Default for LocalNames {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNames {
    pub fn new() -> Self {
        let taken = RESERVED.iter().map(|name| name.to_string()).collect();
        Self {
            by_url: HashMap::new(),
            taken,
        }
    }

    /// Name already assigned to `url`, if any.
    pub fn get(&self, url: &Url) -> Option<&str> {
        self.by_url.get(url.as_str()).map(String::as_str)
    }

    /// Assign (or reuse) the local name for `url`. The boolean is true when
    /// the name was newly assigned.
    pub fn assign(&mut self, url: &Url, kind: AssetKind) -> (String, bool) {
        if let Some(existing) = self.by_url.get(url.as_str()) {
            return (existing.clone(), false);
        }

        let base = base_name(url, kind);
        let mut candidate = base.clone();
        let mut n = 1;
        while self.taken.contains(&candidate) {
            candidate = with_suffix(&base, n);
            n += 1;
        }

        self.taken.insert(candidate.clone());
        self.by_url.insert(url.as_str().to_string(), candidate.clone());
        (candidate, true)
    }
}

/// Derive a filesystem- and URL-safe name from the last path segment.
fn base_name(url: &Url, kind: AssetKind) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or("");
    let decoded = urlencoding::decode_binary(segment.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);

    let sanitized: String = decoded
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut name = sanitized.trim_start_matches('.').to_string();
    if name.is_empty() {
        name = "asset".to_string();
    }

    if split_extension(&name).1.is_empty() {
        if let Some(ext) = kind.default_extension() {
            name.push('.');
            name.push_str(ext);
        }
    }

    truncate_name(&name)
}

/// Split into (stem, extension-without-dot). A leading dot never starts an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}

fn with_suffix(name: &str, n: usize) -> String {
    let (stem, ext) = split_extension(name);
    if ext.is_empty() {
        format!("{stem}-{n}")
    } else {
        format!("{stem}-{n}.{ext}")
    }
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    let ext = if ext.len() > 10 { "" } else { ext };
    let keep = MAX_NAME_LEN.saturating_sub(ext.len() + 1);
    // Sanitized names are ASCII, so byte slicing is safe.
    let stem = &stem[..stem.len().min(keep)];
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_name_from_last_segment() {
        let mut names = LocalNames::new();
        let (name, fresh) = names.assign(&url("https://a.test/static/css/site.css?v=3"), AssetKind::Stylesheet);
        assert_eq!(name, "site.css");
        assert!(fresh);
    }

    #[test]
    fn test_same_url_reuses_name() {
        let mut names = LocalNames::new();
        let first = names.assign(&url("https://a.test/i.png"), AssetKind::Image);
        let second = names.assign(&url("https://a.test/i.png"), AssetKind::Image);
        assert_eq!(first.0, second.0);
        assert!(!second.1);
    }

    #[test]
    fn test_collisions_are_suffixed() {
        let mut names = LocalNames::new();
        let a = names.assign(&url("https://a.test/one/app.js"), AssetKind::Script).0;
        let b = names.assign(&url("https://a.test/two/app.js"), AssetKind::Script).0;
        let c = names.assign(&url("https://cdn.test/app.js"), AssetKind::Script).0;
        assert_eq!(a, "app.js");
        assert_eq!(b, "app-1.js");
        assert_eq!(c, "app-2.js");
    }

    #[test]
    fn test_reserved_names_avoided() {
        let mut names = LocalNames::new();
        let name = names.assign(&url("https://a.test/favicon.ico"), AssetKind::Image).0;
        assert_eq!(name, "favicon-1.ico");
        let name = names.assign(&url("https://a.test/index.html"), AssetKind::Script).0;
        assert_eq!(name, "index-1.html");
        let name = names.assign(&url("https://a.test/api/status"), AssetKind::Image).0;
        assert_eq!(name, "status-1");
    }

    #[test]
    fn test_unsafe_characters_and_dot_segments() {
        let mut names = LocalNames::new();
        let name = names.assign(&url("https://a.test/fonts/my%20font%2F..css"), AssetKind::Stylesheet).0;
        assert_eq!(name, "my_font_..css");

        let name = names.assign(&url("https://a.test/"), AssetKind::Stylesheet).0;
        assert_eq!(name, "asset.css");

        let name = names.assign(&url("https://a.test/.hidden"), AssetKind::Image).0;
        assert_eq!(name, "hidden");
    }

    #[test]
    fn test_default_extension_added() {
        let mut names = LocalNames::new();
        let name = names.assign(&url("https://a.test/loader"), AssetKind::Script).0;
        assert_eq!(name, "loader.js");
    }

    #[test]
    fn test_long_names_truncated() {
        let mut names = LocalNames::new();
        let long = format!("https://a.test/{}.css", "x".repeat(300));
        let name = names.assign(&url(&long), AssetKind::Stylesheet).0;
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.ends_with(".css"));
    }
}
