//! Plain text of a cached page, for search indexing.

use scraper::node::Node;
use scraper::{ElementRef, Html};

/// Elements whose content is never visible text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "iframe", "svg"];

/// Visible text of an HTML document with whitespace collapsed to single
/// spaces. Returns `None` when nothing but whitespace remains.
pub fn extract_page_text(html: &[u8]) -> Option<String> {
    let document = Html::parse_document(&String::from_utf8_lossy(html));

    let mut raw = String::new();
    collect_text(&document.root_element(), &mut raw);

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn collect_text(element: &ElementRef, output: &mut String) {
    if SKIPPED_ELEMENTS.contains(&element.value().name()) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => output.push_str(text),
            Node::Element(_) => {
                if let Some(child_elem) = ElementRef::wrap(child) {
                    collect_text(&child_elem, output);
                }
            }
            _ => {}
        }
    }
}
