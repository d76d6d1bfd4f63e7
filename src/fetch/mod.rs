//! Bounded HTTP retrieval of pages and their assets.
//!
//! Every fetch is limited in time, size and redirect depth, only speaks
//! HTTP(S), and refuses targets on loopback or private networks unless
//! explicitly allowed.

mod address_guard;
mod http_client;

pub use address_guard::{is_forbidden_ip, BlockedAddress, GuardedResolver};
pub use http_client::{FetcherConfig, HttpFetcher};

use async_trait::async_trait;
use url::Url;

/// Transport-level fetch failure. The display text is user-visible as a
/// bookmark's cache error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Refusing to fetch private or loopback address: {0}")]
    ForbiddenAddress(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Response exceeded the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("Server responded with HTTP {0}")]
    HttpStatus(u16),

    #[error("Could not reach host: {0}")]
    Unreachable(String),
}

/// A successfully fetched response body.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    /// Raw Content-Type header, if the server sent one.
    pub content_type: Option<String>,
    /// URL after following redirects.
    pub final_url: Url,
}

impl FetchedResource {
    /// Media type without parameters, lowercased.
    pub fn mime_essence(&self) -> Option<String> {
        self.content_type.as_deref().and_then(|ct| {
            let essence = ct.split(';').next()?.trim().to_ascii_lowercase();
            (!essence.is_empty()).then_some(essence)
        })
    }

    /// Whether the body should be treated as an HTML document.
    ///
    /// A missing Content-Type is sniffed from the leading bytes.
    pub fn is_html(&self) -> bool {
        match self.mime_essence() {
            Some(mime) => mime == "text/html" || mime == "application/xhtml+xml",
            None => looks_like_html(&self.bytes),
        }
    }
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let head = head.trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<head")
}

/// Anything that can retrieve a URL. The lifecycle manager only talks to
/// this trait, so tests can substitute canned responses.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError>;
}

/// Parse and check scheme and literal-address rules for a fetch target.
pub fn validate_target(url: &str, allow_private_networks: bool) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
    check_target(&parsed, allow_private_networks)?;
    Ok(parsed)
}

pub(crate) fn check_target(url: &Url, allow_private_networks: bool) -> Result<(), FetchError> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(FetchError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host()
        .ok_or_else(|| FetchError::InvalidUrl(format!("{url}: missing host")))?;

    if allow_private_networks {
        return Ok(());
    }

    let literal = match host {
        url::Host::Ipv4(ip) => Some(std::net::IpAddr::V4(ip)),
        url::Host::Ipv6(ip) => Some(std::net::IpAddr::V6(ip)),
        url::Host::Domain(_) => None,
    };
    if let Some(ip) = literal {
        if is_forbidden_ip(ip) {
            return Err(FetchError::ForbiddenAddress(ip.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(content_type: Option<&str>, body: &str) -> FetchedResource {
        FetchedResource {
            bytes: body.as_bytes().to_vec(),
            content_type: content_type.map(str::to_string),
            final_url: Url::parse("https://a.test/").unwrap(),
        }
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        assert_eq!(
            validate_target("file:///etc/passwd", false).unwrap_err(),
            FetchError::UnsupportedScheme("file".to_string())
        );
        assert_eq!(
            validate_target("javascript:alert(1)", false).unwrap_err(),
            FetchError::UnsupportedScheme("javascript".to_string())
        );
        assert!(matches!(
            validate_target("ftp://a.test/x", true),
            Err(FetchError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_rejects_literal_private_addresses() {
        assert!(matches!(
            validate_target("http://127.0.0.1:8080/", false),
            Err(FetchError::ForbiddenAddress(_))
        ));
        assert!(matches!(
            validate_target("http://[::1]/", false),
            Err(FetchError::ForbiddenAddress(_))
        ));
        assert!(matches!(
            validate_target("http://10.1.2.3/", false),
            Err(FetchError::ForbiddenAddress(_))
        ));
        assert!(validate_target("http://127.0.0.1:8080/", true).is_ok());
        assert!(validate_target("https://93.184.216.34/", false).is_ok());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            validate_target("not a url", false),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_html_detection() {
        assert!(resource(Some("text/html; charset=utf-8"), "").is_html());
        assert!(resource(None, "  <!DOCTYPE html><html></html>").is_html());
        assert!(!resource(Some("image/png"), "<html>").is_html());
        assert!(!resource(None, "\u{89}PNG").is_html());
    }

    #[test]
    fn test_error_messages_are_readable() {
        assert_eq!(FetchError::Timeout.to_string(), "Request timed out");
        assert_eq!(FetchError::HttpStatus(404).to_string(), "Server responded with HTTP 404");
    }
}
