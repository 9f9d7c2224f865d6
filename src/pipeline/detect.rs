//! Chapter-count detection from the reader's chapter picker.
//!
//! Reader pages usually carry a `<select>` listing every chapter. Counting
//! the distinct chapter numbers in the best such list gives a total for the
//! progress bar and ETA. The count is advisory: the walk still ends only
//! when the next link runs out, a requested count is reached, or a limit
//! trips.

use crate::chapter::ChapterToken;
use crate::page::PageSession;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

static NUMBER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"chapter\s*([0-9]+(?:\.[0-9]+)?)",
        r"kapitel\s*([0-9]+(?:\.[0-9]+)?)",
        r"-ch-([0-9]+(?:\.[0-9]+)?)",
        r"chapter-([0-9]+(?:\.[0-9]+)?)",
        r"([0-9]+(?:\.[0-9]+)?)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const KEYWORDS: &[&str] = &["chapter", "kapitel", "-ch-"];

/// Winning chapter list of a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectedChapters {
    /// Number of distinct chapters; 0 when nothing was found.
    pub count: usize,
    /// Distinct chapter numbers, ascending.
    pub values: Vec<f64>,
}

/// Scan every `<select>` on the loaded page and return the richest chapter
/// list.
pub fn detect_chapter_count<S: PageSession + ?Sized>(session: &S) -> DetectedChapters {
    let mut best = DetectedChapters::default();
    let mut best_preferred = false;

    for select in session.query_all("select") {
        let mut tokens: HashSet<ChapterToken> = HashSet::new();
        for option in session.query_within(&select, "option") {
            let value = option.attr("value").unwrap_or_default().trim();
            let blob = format!("{} {}", option.text().trim(), value).to_lowercase();
            if let Some(token) = option_token(&blob) {
                tokens.insert(token);
            }
        }
        if tokens.is_empty() {
            continue;
        }

        let class = select.attr("class").unwrap_or_default().to_lowercase();
        let preferred =
            class.contains("select") && class.contains("primary") && class.contains("bordered");
        let count = tokens.len();
        if count > best.count || (count == best.count && preferred && !best_preferred) {
            let mut values: Vec<f64> = tokens.iter().map(ChapterToken::value).collect();
            values.sort_by(f64::total_cmp);
            best = DetectedChapters { count, values };
            best_preferred = preferred;
        }
    }

    debug!("Detected {} chapter(s) in chapter pickers", best.count);
    best
}

/// Chapter number of one option's `"text value"` blob (lower-cased).
fn option_token(blob: &str) -> Option<ChapterToken> {
    if !KEYWORDS.iter().any(|k| blob.contains(k)) {
        return None;
    }
    let raw = NUMBER_PATTERNS
        .iter()
        .find_map(|re| re.captures(blob).map(|c| c[1].to_string()))?;
    let value: f64 = raw.parse().ok()?;
    ChapterToken::from_f64(value)
}

/// 1-based position of `current` in `values`: the exact match, else the
/// nearest value. `None` when `values` is empty.
pub fn display_index(values: &[f64], current: f64) -> Option<usize> {
    if let Some(i) = values.iter().position(|v| (v - current).abs() < 1e-6) {
        return Some(i + 1);
    }
    values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - current).abs().total_cmp(&(*b - current).abs()))
        .map(|(i, _)| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::StaticPage;

    #[test]
    fn counts_unique_values_of_best_select() {
        let page = StaticPage::new(
            "https://site.test/t/1-ch-001",
            r#"
            <select class="lang"><option>English</option><option>Deutsch</option></select>
            <select class="select select-primary select-bordered">
              <option value="/t/1-ch-001">Chapter 1</option>
              <option value="/t/2-ch-002">Chapter 2</option>
              <option value="/t/2-ch-002-alt">Chapter 2</option>
              <option value="/t/3-ch-0025">Chapter 2.5</option>
              <option value="/t/4-ch-003">Chapter 3</option>
            </select>"#,
        );
        let found = detect_chapter_count(&page);
        assert_eq!(found.count, 4);
        assert_eq!(found.values, vec![1.0, 2.0, 2.5, 3.0]);
    }

    #[test]
    fn tie_goes_to_preferred_select() {
        let page = StaticPage::new(
            "u",
            r#"
            <select class="plain"><option>Chapter 1</option><option>Chapter 2</option></select>
            <select class="select primary bordered"><option>Kapitel 7</option><option>Kapitel 8</option></select>"#,
        );
        assert_eq!(detect_chapter_count(&page).values, vec![7.0, 8.0]);
    }

    #[test]
    fn no_chapter_select_is_zero() {
        let page = StaticPage::new("u", "<select><option>Sort by date</option></select>");
        assert_eq!(detect_chapter_count(&page), DetectedChapters::default());
    }

    #[test]
    fn option_patterns() {
        assert_eq!(option_token("chapter 12.500 /x").unwrap().to_string(), "12.5");
        assert_eq!(option_token("ep /t/9-ch-014").unwrap().to_string(), "14");
        assert_eq!(option_token("read /t/chapter-7").unwrap().to_string(), "7");
        assert!(option_token("volume 3").is_none());
    }

    #[test]
    fn display_index_exact_then_nearest() {
        let values = [1.0, 2.0, 2.5, 3.0];
        assert_eq!(display_index(&values, 2.5), Some(3));
        assert_eq!(display_index(&values, 2.6), Some(3));
        assert_eq!(display_index(&values, 10.0), Some(4));
        assert_eq!(display_index(&[], 1.0), None);
    }
}
