//! Configuration types for chapter downloads and bundle merges.
//!
//! Download behaviour is controlled through [`DownloadConfig`], built via
//! [`DownloadConfigBuilder`]; merge behaviour through [`MergeConfig`].
//! Image re-encoding knobs live in [`EncodeSettings`], which is also the
//! shape of the on-disk JSON settings file.
//!
//! # Design choice: builder over constructor
//! Most callers only touch two or three knobs (mode, quality, delays). The
//! builder lets them set those and rely on the documented defaults for the
//! rest, while `build()` keeps invalid combinations out of the walker.

use crate::error::DownloadError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// How the walker decides when it has downloaded enough chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkMode {
    /// Stop after `max_chapters` successful chapters.
    Manual { max_chapters: usize },
    /// Follow "next" links until they run out (or a safety limit trips).
    /// The detected chapter count only feeds progress and ETA.
    Auto,
}

impl WalkMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, WalkMode::Auto)
    }

    /// Requested chapter count as recorded in the manifest (0 in auto mode).
    pub fn max_chapters(&self) -> usize {
        match self {
            WalkMode::Manual { max_chapters } => *max_chapters,
            WalkMode::Auto => 0,
        }
    }
}

/// Image re-encoding settings. Default: `{75, true, 1200, false}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSettings {
    /// JPEG quality, 1–100.
    pub jpeg_quality: u8,

    /// Write progressive JPEGs instead of baseline.
    #[serde(alias = "jpeg_progressive")]
    pub progressive: bool,

    /// Images wider than this are downscaled (never upscaled). Pixels.
    pub max_width: u32,

    /// Convert to 8-bit grayscale instead of RGB.
    pub grayscale: bool,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 75,
            progressive: true,
            max_width: 1200,
            grayscale: false,
        }
    }
}

impl EncodeSettings {
    /// Read settings from a JSON object, falling back per field when a value
    /// is missing, has the wrong type, or is out of range.
    pub fn from_json_str(text: &str) -> Self {
        let defaults = Self::default();
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Settings are not valid JSON ({e}); using defaults");
                return defaults;
            }
        };

        let quality = value
            .get("jpeg_quality")
            .and_then(serde_json::Value::as_i64)
            .filter(|q| (1..=100).contains(q))
            .map(|q| q as u8)
            .unwrap_or(defaults.jpeg_quality);
        let progressive = value
            .get("progressive")
            .or_else(|| value.get("jpeg_progressive"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(defaults.progressive);
        let max_width = value
            .get("max_width")
            .and_then(serde_json::Value::as_u64)
            .filter(|w| *w > 0 && *w <= u32::MAX as u64)
            .map(|w| w as u32)
            .unwrap_or(defaults.max_width);
        let grayscale = value
            .get("grayscale")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(defaults.grayscale);

        Self {
            jpeg_quality: quality,
            progressive,
            max_width,
            grayscale,
        }
    }

    /// Load from a settings file. A missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text),
            Err(e) => {
                warn!("Could not read settings '{}': {e}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

/// Fixed delays of the walk. All are deliberate rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait after every navigation so the page can settle. Default: 4 s.
    pub settle_delay: Duration,
    /// Pause between two image downloads. Default: 200 ms.
    pub image_delay: Duration,
    /// Pause before moving on to the next chapter. Default: 2 s.
    pub chapter_delay: Duration,
    /// Wait after a failed image attempt. Default: 500 ms.
    pub retry_backoff: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(4),
            image_delay: Duration::from_millis(200),
            chapter_delay: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl Timing {
    /// No delays at all. Useful for tests and local mirrors.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            image_delay: Duration::ZERO,
            chapter_delay: Duration::ZERO,
            retry_backoff: Duration::ZERO,
        }
    }
}

/// Configuration for a chapter walk.
///
/// Built via [`DownloadConfig::builder()`] or [`DownloadConfig::default()`].
///
/// # Example
/// ```rust
/// use mangapdf::{DownloadConfig, WalkMode};
///
/// let config = DownloadConfig::builder()
///     .mode(WalkMode::Manual { max_chapters: 3 })
///     .jpeg_quality(85)
///     .build()
///     .unwrap();
/// assert_eq!(config.mode.max_chapters(), 3);
/// ```
#[derive(Clone)]
pub struct DownloadConfig {
    /// Title used in document names (`Chapter_012 - <title>.pdf`).
    pub manga_title: String,

    /// Termination mode. Default: auto.
    pub mode: WalkMode,

    /// Image re-encoding settings.
    pub encode: EncodeSettings,

    /// Fixed delays.
    pub timing: Timing,

    /// Hard cap on chapters per walk, in every mode. Default: 200.
    pub max_chapters_limit: usize,

    /// Consecutive chapter failures that end the walk. Default: 5.
    pub max_chapter_failures: usize,

    /// Attempts per image before it is skipped. Default: 2.
    pub image_attempts: u32,

    /// Remove the chapter's image folder once its PDF is written. Default: false.
    pub delete_images_after_pdf: bool,

    /// Keep the session manifest after the walk (for an immediate merge of
    /// only this session's chapters). Default: false.
    pub keep_manifest: bool,

    /// User agent for the HTTP page session.
    pub user_agent: String,

    /// Per-request timeout of the HTTP page session, seconds. Default: 30.
    pub request_timeout_secs: u64,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            manga_title: "Manga".to_string(),
            mode: WalkMode::Auto,
            encode: EncodeSettings::default(),
            timing: Timing::default(),
            max_chapters_limit: 200,
            max_chapter_failures: 5,
            image_attempts: 2,
            delete_images_after_pdf: false,
            keep_manifest: false,
            user_agent: concat!("mangapdf/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("manga_title", &self.manga_title)
            .field("mode", &self.mode)
            .field("encode", &self.encode)
            .field("timing", &self.timing)
            .field("max_chapters_limit", &self.max_chapters_limit)
            .field("max_chapter_failures", &self.max_chapter_failures)
            .field("image_attempts", &self.image_attempts)
            .field("delete_images_after_pdf", &self.delete_images_after_pdf)
            .field("keep_manifest", &self.keep_manifest)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DownloadProgressCallback>"),
            )
            .finish()
    }
}

impl DownloadConfig {
    /// Create a new builder for `DownloadConfig`.
    pub fn builder() -> DownloadConfigBuilder {
        DownloadConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DownloadConfig`].
#[derive(Debug)]
pub struct DownloadConfigBuilder {
    config: DownloadConfig,
}

impl DownloadConfigBuilder {
    pub fn manga_title(mut self, title: impl Into<String>) -> Self {
        self.config.manga_title = title.into();
        self
    }

    pub fn mode(mut self, mode: WalkMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn encode(mut self, settings: EncodeSettings) -> Self {
        self.config.encode = settings;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.encode.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn max_width(mut self, px: u32) -> Self {
        self.config.encode.max_width = px;
        self
    }

    pub fn grayscale(mut self, v: bool) -> Self {
        self.config.encode.grayscale = v;
        self
    }

    pub fn progressive(mut self, v: bool) -> Self {
        self.config.encode.progressive = v;
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn settle_delay(mut self, d: Duration) -> Self {
        self.config.timing.settle_delay = d;
        self
    }

    pub fn image_delay(mut self, d: Duration) -> Self {
        self.config.timing.image_delay = d;
        self
    }

    pub fn chapter_delay(mut self, d: Duration) -> Self {
        self.config.timing.chapter_delay = d;
        self
    }

    pub fn max_chapters_limit(mut self, n: usize) -> Self {
        self.config.max_chapters_limit = n;
        self
    }

    pub fn max_chapter_failures(mut self, n: usize) -> Self {
        self.config.max_chapter_failures = n;
        self
    }

    pub fn image_attempts(mut self, n: u32) -> Self {
        self.config.image_attempts = n.max(1);
        self
    }

    pub fn delete_images_after_pdf(mut self, v: bool) -> Self {
        self.config.delete_images_after_pdf = v;
        self
    }

    pub fn keep_manifest(mut self, v: bool) -> Self {
        self.config.keep_manifest = v;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DownloadConfig, DownloadError> {
        let c = &self.config;
        if c.encode.jpeg_quality == 0 || c.encode.jpeg_quality > 100 {
            return Err(DownloadError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.encode.jpeg_quality
            )));
        }
        if c.encode.max_width == 0 {
            return Err(DownloadError::InvalidConfig("max width must be ≥ 1".into()));
        }
        if c.max_chapters_limit == 0 {
            return Err(DownloadError::InvalidConfig(
                "chapter safety limit must be ≥ 1".into(),
            ));
        }
        if c.max_chapter_failures == 0 {
            return Err(DownloadError::InvalidConfig(
                "failure threshold must be ≥ 1".into(),
            ));
        }
        if let WalkMode::Manual { max_chapters: 0 } = c.mode {
            return Err(DownloadError::InvalidConfig(
                "manual mode needs at least one chapter".into(),
            ));
        }
        if c.manga_title.trim().is_empty() {
            return Err(DownloadError::InvalidConfig("title must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Merge configuration ──────────────────────────────────────────────────

/// Where the merger takes its list of chapter documents from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MergeSource {
    /// Every matching PDF in the folder, sorted by start bound. (default)
    #[default]
    FolderScan,
    /// Only the PDFs recorded in the folder's latest session manifest,
    /// in the order they were written.
    SessionManifest,
    /// An explicit list, merged in the given order.
    Files(Vec<std::path::PathBuf>),
}

/// Configuration for a bundle merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    /// Chapters per output document. Default: 3.
    pub chapters_per_bundle: usize,
    /// Source of the document list.
    pub source: MergeSource,
    /// Leave `Chapter_001-005 - T.pdf` style files out. Default: true.
    pub ignore_merged: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            chapters_per_bundle: 3,
            source: MergeSource::default(),
            ignore_merged: true,
        }
    }
}

impl MergeConfig {
    pub fn new(chapters_per_bundle: usize) -> Self {
        Self {
            chapters_per_bundle,
            ..Self::default()
        }
    }

    pub fn source(mut self, source: MergeSource) -> Self {
        self.source = source;
        self
    }

    pub fn ignore_merged(mut self, v: bool) -> Self {
        self.ignore_merged = v;
        self
    }
}
