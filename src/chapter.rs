//! Chapter numbers and the filename grammar built on them.
//!
//! Every component that reads or writes a chapter number goes through
//! [`ChapterToken`]: the identifier formats labels with it, the detector
//! canonicalises select options with it, and the merger parses and formats
//! filename bounds with it.
//!
//! Two spellings exist on disk:
//!
//! | Form    | Example                      | Written by |
//! |---------|------------------------------|------------|
//! | label   | `Chapter_012.5 - Title.pdf`  | walker     |
//! | bound   | `Chapter_012_5-018 - T.pdf`  | merger     |
//!
//! Both parse back to the same token.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A chapter number: a whole part plus optional fraction digits kept verbatim.
///
/// Equality and ordering are numeric, so `12.5` and `12.50` compare equal
/// while their labels still print the digits they were parsed from.
#[derive(Debug, Clone)]
pub struct ChapterToken {
    whole: u64,
    fraction: Option<String>,
}

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(?:[._](\d+))?$").unwrap());

static RE_TEXT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Chapter\s+(\d+(?:\.\d+)?)").unwrap());

static RE_URL_CH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-ch-(\d+)").unwrap());

static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

static RE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Chapter_(\d+(?:[._]\d+)?)").unwrap());

static RE_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Chapter_(\d+(?:[._]\d+)?)-(\d+(?:[._]\d+)?)").unwrap());

static RE_MERGED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Chapter_\d+(?:[._]\d+)?-\d+(?:[._]\d+)?\s*-\s*.+\.pdf$").unwrap()
});

static RE_TITLE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i) - (.*)\.pdf").unwrap());

/// Label used when neither the page nor the URL carries a number.
pub const UNKNOWN_LABEL: &str = "Chapter_000";

impl ChapterToken {
    /// Build a token from its parts. An empty fraction is treated as none.
    pub fn new(whole: u64, fraction: Option<&str>) -> Self {
        let fraction = fraction
            .filter(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_string);
        Self { whole, fraction }
    }

    /// Parse `12`, `012`, `12.5` or `012_5`.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = RE_TOKEN.captures(s.trim())?;
        let whole = caps[1].parse::<u64>().ok()?;
        Some(Self::new(whole, caps.get(2).map(|m| m.as_str())))
    }

    /// Canonicalise a float to at most three decimals (`12.500` → `12.5`).
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let text = format!("{value:.3}");
        let text = text.trim_end_matches('0').trim_end_matches('.');
        Self::parse(text)
    }

    pub fn whole(&self) -> u64 {
        self.whole
    }

    pub fn fraction(&self) -> Option<&str> {
        self.fraction.as_deref()
    }

    pub fn value(&self) -> f64 {
        match &self.fraction {
            Some(f) => format!("{}.{}", self.whole, f)
                .parse()
                .unwrap_or(self.whole as f64),
            None => self.whole as f64,
        }
    }

    /// `Chapter_012` or `Chapter_012.5`.
    pub fn label(&self) -> String {
        match &self.fraction {
            Some(f) => format!("Chapter_{:03}.{}", self.whole, f),
            None => format!("Chapter_{:03}", self.whole),
        }
    }

    /// `012` or `012_5`, the spelling used inside merged filenames.
    pub fn bound(&self) -> String {
        match &self.fraction {
            Some(f) => format!("{:03}_{}", self.whole, f),
            None => format!("{:03}", self.whole),
        }
    }

    fn significant_fraction(&self) -> &str {
        self.fraction
            .as_deref()
            .map(|f| f.trim_end_matches('0'))
            .unwrap_or("")
    }
}

impl fmt::Display for ChapterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.significant_fraction() {
            "" => write!(f, "{}", self.whole),
            frac => write!(f, "{}.{}", self.whole, frac),
        }
    }
}

impl PartialEq for ChapterToken {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ChapterToken {}

impl Hash for ChapterToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.whole.hash(state);
        self.significant_fraction().hash(state);
    }
}

impl PartialOrd for ChapterToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChapterToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.whole.cmp(&other.whole).then_with(|| {
            // Right-pad to equal width so digit strings compare as decimals.
            let a = self.significant_fraction();
            let b = other.significant_fraction();
            let width = a.len().max(b.len());
            format!("{a:0<width$}").cmp(&format!("{b:0<width$}"))
        })
    }
}

/// The `(start, end)` pair encoded in a chapter document's filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounds {
    pub start: ChapterToken,
    pub end: ChapterToken,
}

impl Bounds {
    /// Lowest of the two ends (ranges written backwards still sort sanely).
    pub fn min(&self) -> &ChapterToken {
        std::cmp::min(&self.start, &self.end)
    }

    pub fn max(&self) -> &ChapterToken {
        std::cmp::max(&self.start, &self.end)
    }
}

/// Find a `Chapter <number>` marker in free text and format it as a label.
pub fn label_from_text(text: &str) -> Option<String> {
    let caps = RE_TEXT_MARKER.captures(text)?;
    ChapterToken::parse(&caps[1]).map(|t| t.label())
}

/// Derive a label from a chapter URL: digits after `-ch-`, else the last
/// digit run, else [`UNKNOWN_LABEL`]. Pure string parsing.
pub fn label_from_url(url: &str) -> String {
    let digits = RE_URL_CH
        .captures(url)
        .map(|c| c[1].to_string())
        .or_else(|| RE_DIGITS.find_iter(url).last().map(|m| m.as_str().to_string()));

    digits
        .and_then(|d| d.parse::<u64>().ok())
        .map(|n| ChapterToken::new(n, None).label())
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

/// Recover the token from a label such as `Chapter_012.5`.
pub fn token_from_label(label: &str) -> Option<ChapterToken> {
    let caps = RE_LABEL.captures(label)?;
    ChapterToken::parse(&caps[1])
}

/// Parse the bounds from a filename; single chapters yield `start == end`.
pub fn parse_bounds(file_name: &str) -> Option<Bounds> {
    if let Some(caps) = RE_RANGE.captures(file_name) {
        let start = ChapterToken::parse(&caps[1])?;
        let end = ChapterToken::parse(&caps[2])?;
        return Some(Bounds { start, end });
    }
    let token = token_from_label(file_name)?;
    Some(Bounds {
        start: token.clone(),
        end: token,
    })
}

/// Whether a filename is already a merged bundle (`Chapter_001-005 - T.pdf`).
pub fn is_already_merged(file_name: &str) -> bool {
    RE_MERGED_NAME.is_match(file_name)
}

/// Display title carried after ` - ` in a chapter document name.
pub fn title_from_file_name(file_name: &str) -> Option<String> {
    RE_TITLE_SUFFIX
        .captures(file_name)
        .map(|c| c[1].to_string())
        .filter(|t| !t.is_empty())
}

/// Output name for a bundle spanning `min..=max`.
pub fn bundle_file_name(min: &ChapterToken, max: &ChapterToken, title: &str) -> String {
    format!("Chapter_{}-{} - {}.pdf", min.bound(), max.bound(), title)
}

/// Name of a single chapter's document.
pub fn chapter_file_name(label: &str, title: &str) -> String {
    format!("{label} - {title}.pdf")
}
