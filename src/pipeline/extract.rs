//! Link extraction from a loaded chapter page: page images and the
//! "next chapter" control.

use crate::page::{PageElement, PageSession};
use tracing::debug;

/// Primary reader image class; every `<img>` is used when it matches nothing.
const READER_IMAGE_SELECTOR: &str = "img.w-full.h-full";

/// Attributes that may hold a lazily loaded image URL, in lookup order.
const SOURCE_ATTRIBUTES: &[&str] = &["src", "data-src", "data-lazy-src", "data-original", "srcset"];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif"];

/// A CSS selector plus the text the matched element must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub css: &'static str,
    pub text: &'static str,
}

impl Locator {
    /// Case-insensitive substring match on the element's text.
    pub fn matches_text(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.text.to_lowercase())
    }
}

/// Next-chapter controls, most specific first.
pub const NEXT_LOCATORS: &[Locator] = &[
    Locator {
        css: "a.btn.btn-sm.btn-outline.btn-primary",
        text: "Next Chapter",
    },
    Locator {
        css: "a.btn",
        text: "Next Chapter",
    },
    Locator {
        css: "a.btn",
        text: "Next",
    },
    Locator {
        css: r#"a[class*="btn"]"#,
        text: "Next",
    },
    Locator {
        css: r#"a[href*="-ch-"]"#,
        text: "Next",
    },
];

/// Collect the chapter's image URLs in page order, de-duplicated.
pub fn extract_image_links<S: PageSession + ?Sized>(session: &S) -> Vec<String> {
    let mut images = session.query_all(READER_IMAGE_SELECTOR);
    if images.is_empty() {
        images = session.query_all("img");
    }

    let mut links: Vec<String> = Vec::new();
    for img in &images {
        let Some(raw) = image_source(img) else {
            continue;
        };
        let url = clean_image_url(&raw);
        if is_image_url(&url) && !links.contains(&url) {
            links.push(url);
        }
    }
    debug!("{} image link(s) from {} <img> element(s)", links.len(), images.len());
    links
}

fn image_source(img: &PageElement) -> Option<String> {
    SOURCE_ATTRIBUTES.iter().find_map(|attr| {
        let value = img.attr(attr)?.trim();
        if value.is_empty() {
            return None;
        }
        if *attr == "srcset" {
            // "a.jpg 1x, b.jpg 2x" → "a.jpg"
            let first = value.split(',').next()?.split_whitespace().next()?;
            return Some(first.to_string());
        }
        Some(value.to_string())
    })
}

/// Strip the query string and surrounding whitespace.
pub fn clean_image_url(url: &str) -> String {
    url.split('?').next().unwrap_or_default().trim().to_string()
}

fn is_image_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) || lower.contains("/media/")
}

/// Find the next chapter's URL, or `None` when the page has no usable
/// next control.
pub fn find_next_chapter_url<S: PageSession + ?Sized>(session: &S) -> Option<String> {
    let page_url = session.current_url().unwrap_or_default();
    for locator in NEXT_LOCATORS {
        let Some(el) = session
            .query_all(locator.css)
            .into_iter()
            .find(|el| locator.matches_text(el.text()))
        else {
            continue;
        };
        let Some(href) = el.attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        if let Some(url) = resolve_href(&page_url, href) {
            debug!("Next chapter via '{}': {url}", locator.css);
            return Some(url);
        }
    }
    None
}

/// Absolute hrefs are kept; root-relative ones are joined to the page
/// origin. Anything else is not followed.
pub fn resolve_href(page_url: &str, href: &str) -> Option<String> {
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    if href.starts_with('/') {
        let base = url::Url::parse(page_url).ok()?;
        return base.join(href).ok().map(|u| u.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::StaticPage;

    #[test]
    fn reader_images_take_precedence() {
        let page = StaticPage::new(
            "https://site.test/title/1-ch-001",
            r#"<img class="w-full h-full" src="https://cdn.test/a.jpg?x=1">
               <img src="https://cdn.test/logo.png">"#,
        );
        assert_eq!(extract_image_links(&page), vec!["https://cdn.test/a.jpg"]);
    }

    #[test]
    fn lazy_attributes_and_dedup() {
        let page = StaticPage::new(
            "https://site.test/c/1",
            r#"<img src="" data-src="https://cdn.test/a.jpg">
               <img data-lazy-src="https://cdn.test/a.jpg?v=2">
               <img srcset="https://cdn.test/b.webp 1x, https://cdn.test/b2.webp 2x">
               <img data-original="https://img.test/media/12345">
               <img src="/relative/c.jpg">
               <img src="https://cdn.test/readme.txt">"#,
        );
        assert_eq!(
            extract_image_links(&page),
            vec![
                "https://cdn.test/a.jpg",
                "https://cdn.test/b.webp",
                "https://img.test/media/12345",
            ]
        );
    }

    #[test]
    fn duplicates_collapse_after_query_stripping() {
        let page = StaticPage::new(
            "https://site.test/c/1",
            r#"<img class="w-full h-full" src="https://cdn.test/a.jpg">
               <img class="w-full h-full" src="https://cdn.test/b.jpg?x=1">
               <img class="w-full h-full" src="https://cdn.test/a.jpg">"#,
        );
        assert_eq!(
            extract_image_links(&page),
            vec!["https://cdn.test/a.jpg", "https://cdn.test/b.jpg"]
        );
    }

    #[test]
    fn no_images_is_empty_not_error() {
        let page = StaticPage::new("https://site.test/c/1", "<p>nothing here</p>");
        assert!(extract_image_links(&page).is_empty());
    }

    #[test]
    fn next_link_prefers_specific_button() {
        let page = StaticPage::new(
            "https://site.test/title/1-ch-001",
            r#"<a class="btn" href="/title/other">Next</a>
               <a class="btn btn-sm btn-outline btn-primary" href="/title/2-ch-002">Next Chapter</a>"#,
        );
        assert_eq!(
            find_next_chapter_url(&page).as_deref(),
            Some("https://site.test/title/2-ch-002")
        );
    }

    #[test]
    fn next_link_falls_through_unusable_hrefs() {
        let page = StaticPage::new(
            "https://site.test/title/1-ch-001",
            r##"<a class="btn" href="#">Next Chapter</a>
               <a class="link" href="https://site.test/title/2-ch-002">Next</a>"##,
        );
        assert_eq!(
            find_next_chapter_url(&page).as_deref(),
            Some("https://site.test/title/2-ch-002")
        );
    }

    #[test]
    fn next_link_text_ignores_case() {
        let page = StaticPage::new(
            "https://site.test/title/1-ch-001",
            r#"<a class="btn btn-sm btn-outline btn-primary" href="/title/2-ch-002">NEXT CHAPTER</a>"#,
        );
        assert_eq!(
            find_next_chapter_url(&page).as_deref(),
            Some("https://site.test/title/2-ch-002")
        );
        assert!(NEXT_LOCATORS[2].matches_text("next »"));
        assert!(!NEXT_LOCATORS[2].matches_text("Previous"));
    }

    #[test]
    fn no_next_control_is_none() {
        let page = StaticPage::new("https://site.test/c/9", r#"<a href="/home">Home</a>"#);
        assert!(find_next_chapter_url(&page).is_none());
    }

    #[test]
    fn resolve_href_rules() {
        assert_eq!(
            resolve_href("https://a.test/x/y", "/z").as_deref(),
            Some("https://a.test/z")
        );
        assert_eq!(
            resolve_href("https://a.test/x/y", "https://b.test/q").as_deref(),
            Some("https://b.test/q")
        );
        assert_eq!(resolve_href("https://a.test/x/y", "next.html"), None);
    }
}
