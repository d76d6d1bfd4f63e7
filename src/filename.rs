//! Canonical URL-encoded form of stored filenames.
//!
//! Filenames are stored percent-encoded so they can be dropped into URLs and
//! plain-text listings verbatim. Normalization decodes first and re-encodes,
//! which makes it idempotent: already-encoded input maps to itself.

use std::borrow::Cow;

/// Returns true if the filename contains only RFC 3986 unreserved characters
/// plus percent signs from existing escapes.
pub fn is_url_safe(filename: &str) -> bool {
    !filename.is_empty()
        && filename
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'%'))
}

/// Normalize a filename to its URL-encoded form.
///
/// `+` is treated as an encoded space, matching form-style unescaping, so the
/// encoded output never contains a literal `+`.
pub fn normalize_filename(filename: &str) -> String {
    if filename.is_empty() {
        return String::new();
    }
    let spaced = filename.replace('+', " ");
    let decoded = urlencoding::decode_binary(spaced.as_bytes());
    let decoded: Cow<'_, str> = String::from_utf8_lossy(&decoded);
    urlencoding::encode(&decoded).into_owned()
}

/// Return the filename untouched if it is already URL-safe, otherwise encode it.
///
/// Safety net for listing output so already-encoded names are not encoded twice.
pub fn ensure_url_safe(filename: &str) -> Cow<'_, str> {
    if is_url_safe(filename) {
        Cow::Borrowed(filename)
    } else {
        Cow::Owned(urlencoding::encode(filename).into_owned())
    }
}
