//! Static HTML snapshots queried with `scraper`.
//!
//! `scraper::Html` is not `Send`, so documents are kept as source text and
//! parsed per query. Chapter pages are small and queried a few times each.

use super::PageElement;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// A loaded page: its final URL and HTML source.
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    url: String,
    source: String,
}

impl HtmlDocument {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn select(&self, selector: &str) -> Vec<PageElement> {
        let doc = Html::parse_document(&self.source);
        select_from(&doc, selector)
    }
}

/// Query the subtree of `parent`.
pub(crate) fn select_in(parent: &PageElement, selector: &str) -> Vec<PageElement> {
    let fragment = Html::parse_fragment(parent.outer_html());
    select_from(&fragment, selector)
}

fn select_from(doc: &Html, selector: &str) -> Vec<PageElement> {
    let sel = match Selector::parse(selector) {
        Ok(s) => s,
        Err(e) => {
            debug!("Ignoring unparsable selector '{selector}': {e}");
            return Vec::new();
        }
    };
    doc.select(&sel).map(snapshot).collect()
}

fn snapshot(el: ElementRef<'_>) -> PageElement {
    let text = normalize_text(&el.text().collect::<Vec<_>>().join(" "));
    let attributes = el
        .value()
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    PageElement::new(el.value().name(), text, attributes, el.html())
}

fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
