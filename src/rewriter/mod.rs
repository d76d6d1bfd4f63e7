//! Capture-side HTML rewriting.
//!
//! A single streaming pass over the fetched document finds stylesheets,
//! scripts, images and the favicon link, assigns each a snapshot-local name
//! and points the attribute at that name. Markup that is not touched is
//! passed through byte for byte, so malformed documents survive unchanged.

mod naming;
mod text;

pub use naming::LocalNames;
pub use text::extract_page_text;

use std::cell::RefCell;

use lol_html::{element, HtmlRewriter, Settings};
use tracing::debug;
use url::Url;

use crate::models::FAVICON_NAME;

/// Kind of captured sub-resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Stylesheet,
    Script,
    Image,
}

impl AssetKind {
    /// Extension appended when the URL path carries none.
    pub fn default_extension(&self) -> Option<&'static str> {
        match self {
            Self::Stylesheet => Some("css"),
            Self::Script => Some("js"),
            Self::Image => None,
        }
    }

    /// Content type to store when the server does not declare one and the
    /// name gives no hint.
    pub fn fallback_content_type(&self) -> &'static str {
        match self {
            Self::Stylesheet => "text/css",
            Self::Script => "text/javascript",
            Self::Image => "application/octet-stream",
        }
    }
}

/// One asset the archive must fetch and store under `local_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub url: Url,
    pub local_name: String,
    pub kind: AssetKind,
}

/// Result of rewriting one document.
#[derive(Debug, Clone)]
pub struct RewrittenPage {
    pub html: Vec<u8>,
    /// Assets in document order, each URL once.
    pub assets: Vec<AssetRef>,
    /// References past the asset limit, left pointing at the live site.
    pub omitted_assets: usize,
    /// Favicon locations to try in order: the declared icon link, then
    /// `/favicon.ico` on the page's origin.
    pub favicon_urls: Vec<Url>,
}

/// Failure inside the streaming rewriter.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("HTML rewrite failed: {0}")]
    Rewriting(String),
}

struct Collector {
    base: Url,
    names: LocalNames,
    assets: Vec<AssetRef>,
    max_assets: usize,
    omitted: usize,
    favicon: Option<Url>,
}

impl Collector {
    /// Resolve a reference and return the local name to write back, or
    /// `None` when the reference is not captured.
    fn capture(&mut self, raw: &str, kind: AssetKind) -> Option<String> {
        let url = resolve_reference(&self.base, raw)?;
        if let Some(existing) = self.names.get(&url) {
            return Some(existing.to_string());
        }
        if self.assets.len() >= self.max_assets {
            self.omitted += 1;
            return None;
        }

        let (local_name, _) = self.names.assign(&url, kind);
        self.assets.push(AssetRef {
            url,
            local_name: local_name.clone(),
            kind,
        });
        Some(local_name)
    }
}

/// Rewrite `html` fetched from `base_url` into a snapshot-relative document.
///
/// At most `max_assets` distinct sub-resources are captured; further
/// references keep their original attribute values.
pub fn rewrite(
    html: &[u8],
    base_url: &Url,
    max_assets: usize,
) -> Result<RewrittenPage, RewriteError> {
    let collector = RefCell::new(Collector {
        base: base_url.clone(),
        names: LocalNames::new(),
        assets: Vec::new(),
        max_assets,
        omitted: 0,
        favicon: None,
    });
    let mut output = Vec::with_capacity(html.len());

    {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    // A <base> would redirect the local names back to the live site.
                    element!("base[href]", |el| {
                        if let Some(href) = el.get_attribute("href") {
                            let mut state = collector.borrow_mut();
                            if let Some(resolved) = resolve_reference(&state.base, &href) {
                                state.base = resolved;
                            }
                        }
                        el.remove();
                        Ok(())
                    }),
                    element!("link[href]", |el| {
                        let rel = el.get_attribute("rel").unwrap_or_default().to_ascii_lowercase();
                        let tokens: Vec<&str> = rel.split_ascii_whitespace().collect();
                        let Some(href) = el.get_attribute("href") else {
                            return Ok(());
                        };

                        let mut state = collector.borrow_mut();
                        if tokens.contains(&"stylesheet") {
                            if let Some(local) = state.capture(&href, AssetKind::Stylesheet) {
                                el.set_attribute("href", &local)?;
                            }
                        } else if tokens.contains(&"icon") && state.favicon.is_none() {
                            if let Some(url) = resolve_reference(&state.base, &href) {
                                state.favicon = Some(url);
                                el.set_attribute("href", FAVICON_NAME)?;
                            }
                        }
                        Ok(())
                    }),
                    element!("script[src]", |el| {
                        if let Some(src) = el.get_attribute("src") {
                            if let Some(local) = collector.borrow_mut().capture(&src, AssetKind::Script) {
                                el.set_attribute("src", &local)?;
                            }
                        }
                        Ok(())
                    }),
                    element!("img[src]", |el| {
                        if let Some(src) = el.get_attribute("src") {
                            if let Some(local) = collector.borrow_mut().capture(&src, AssetKind::Image) {
                                el.set_attribute("src", &local)?;
                                // Responsive candidates still point at the live site.
                                el.remove_attribute("srcset");
                            }
                        }
                        Ok(())
                    }),
                ],
                ..Settings::default()
            },
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );

        rewriter
            .write(html)
            .map_err(|e| RewriteError::Rewriting(e.to_string()))?;
        rewriter
            .end()
            .map_err(|e| RewriteError::Rewriting(e.to_string()))?;
    }

    let collector = collector.into_inner();
    let mut favicon_urls: Vec<Url> = collector.favicon.into_iter().collect();
    if let Ok(implicit) = base_url.join("/favicon.ico") {
        if !favicon_urls.contains(&implicit) {
            favicon_urls.push(implicit);
        }
    }

    debug!(
        base = %base_url,
        assets = collector.assets.len(),
        omitted = collector.omitted,
        "Rewrote document"
    );

    Ok(RewrittenPage {
        html: output,
        assets: collector.assets,
        omitted_assets: collector.omitted,
        favicon_urls,
    })
}

/// Resolve an attribute value to an absolute http(s) URL without fragment.
///
/// Inline (`data:`), script (`javascript:`) and fragment-only references are
/// not captured.
fn resolve_reference(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
