//! Page collaborator: the seam between the walker and whatever loads pages.
//!
//! The walker only needs a handful of operations: load a URL, query the
//! loaded page with CSS selectors, and fetch a resource reusing the same
//! session (cookies, `Referer`). [`PageSession`] captures exactly those.
//!
//! [`HttpPageSession`] is the shipped implementation: plain HTTP with a
//! cookie store, parsing static HTML. Sites that assemble their image list
//! in JavaScript need a richer implementation (e.g. a WebDriver-backed one)
//! plugged in behind the same trait.

mod html;
mod http;

pub use html::HtmlDocument;
pub use http::HttpPageSession;

use crate::error::SessionError;
use futures::future::BoxFuture;

/// A snapshot of one element of the loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageElement {
    tag: String,
    text: String,
    attributes: Vec<(String, String)>,
    outer_html: String,
}

impl PageElement {
    pub fn new(
        tag: impl Into<String>,
        text: impl Into<String>,
        attributes: Vec<(String, String)>,
        outer_html: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            text: text.into(),
            attributes,
            outer_html: outer_html.into(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Visible text with whitespace runs collapsed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn outer_html(&self) -> &str {
        &self.outer_html
    }
}

/// Response of [`PageSession::fetch`]. Non-success statuses are returned,
/// not raised; only transport failures are errors.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub bytes: Vec<u8>,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Operations the walker needs from a browsing session.
pub trait PageSession: Send + Sync {
    /// Load `url`. Replaces the current page on success.
    fn navigate<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<(), SessionError>>;

    /// URL of the loaded page after redirects.
    fn current_url(&self) -> Option<String>;

    /// Elements of the loaded page matching `selector`, in document order.
    /// Empty when nothing is loaded or the selector does not parse.
    fn query_all(&self, selector: &str) -> Vec<PageElement>;

    /// Elements below `parent` matching `selector`.
    fn query_within(&self, parent: &PageElement, selector: &str) -> Vec<PageElement> {
        html::select_in(parent, selector)
    }

    /// Fetch a resource with extra request headers.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<FetchResponse, SessionError>>;
}
