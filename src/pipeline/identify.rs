//! Chapter label resolution.
//!
//! The page's own "Chapter 12.5" marker wins; the URL is the fallback.

use crate::chapter::{label_from_text, label_from_url};
use crate::page::PageSession;
use tracing::debug;

/// Elements that carry the visible chapter marker, most specific first.
const MARKER_SELECTORS: &[&str] = &["span.opacity-80", "h1", "h2", "h3"];

/// Resolve the `Chapter_NNN` label for the loaded page.
///
/// `url` is the chapter URL the walker navigated to; it is used when no
/// marker on the page carries a chapter number.
pub fn identify_chapter<S: PageSession + ?Sized>(session: &S, url: &str) -> String {
    for selector in MARKER_SELECTORS {
        for el in session.query_all(selector) {
            if !el.text().to_ascii_lowercase().contains("chapter") {
                continue;
            }
            if let Some(label) = label_from_text(el.text()) {
                debug!("Chapter label '{label}' from <{selector}> marker");
                return label;
            }
        }
    }
    let label = label_from_url(url);
    debug!("Chapter label '{label}' from URL {url}");
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::StaticPage;

    #[test]
    fn marker_with_fraction() {
        let page = StaticPage::new(
            "https://site.test/t/99-ch-099",
            r#"<span class="opacity-80">Vol. 2 Chapter 12.5</span>"#,
        );
        assert_eq!(identify_chapter(&page, page_url(&page).as_str()), "Chapter_012.5");
    }

    #[test]
    fn heading_marker_is_used_when_span_missing() {
        let page = StaticPage::new("https://site.test/x", "<h1>Some Title - chapter 7</h1>");
        assert_eq!(identify_chapter(&page, "https://site.test/x"), "Chapter_007");
    }

    #[test]
    fn url_fallback() {
        let page = StaticPage::new(
            "https://site.test/title/123-ch-045",
            r#"<span class="opacity-80">Episode</span>"#,
        );
        assert_eq!(
            identify_chapter(&page, "https://site.test/title/123-ch-045"),
            "Chapter_045"
        );
        assert_eq!(identify_chapter(&page, "https://site.test/title/"), "Chapter_000");
    }

    fn page_url(page: &StaticPage) -> String {
        page.current_url().unwrap_or_default()
    }
}
