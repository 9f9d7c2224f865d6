//! Progress-callback trait for walk, chapter and image events.
//!
//! Inject an [`Arc<dyn DownloadProgressCallback>`] via
//! [`crate::config::DownloadConfigBuilder::progress_callback`] to receive
//! status lines, the overall progress percentage and session statistics as
//! the walker moves through chapters.
//!
//! Callers forward events wherever they like (a terminal progress bar, a
//! channel, a log file) without the library knowing how the host
//! application communicates. The trait is `Send + Sync` because events are
//! emitted from the walker task while the caller may hold the same `Arc`
//! on another thread.
//!
//! # Example
//!
//! ```rust
//! use mangapdf::{DownloadProgressCallback, DownloadConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: Arc<AtomicUsize>,
//! }
//!
//! impl DownloadProgressCallback for CountingCallback {
//!     fn on_chapter_complete(&self, label: &str, pdf_path: &std::path::Path, images: usize) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{n} {label}: {images} images -> {}", pdf_path.display());
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     done: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = DownloadConfig::builder()
//!     .progress_callback(counter as Arc<dyn DownloadProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Snapshot of the running session, emitted before every chapter and once
/// at the end of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// Chapters written so far.
    pub chapters_done: usize,
    /// Detected or requested chapter total; 0 when unknown.
    pub chapters_total: usize,
    /// Images saved across all chapters of the session.
    pub images_total: usize,
    /// `images_total / chapters_done`, 0 before the first chapter.
    pub avg_images_per_chapter: f64,
    /// Throughput over running (unpaused) time.
    pub chapters_per_minute: f64,
    /// Projected seconds to finish; 0 when unknown or at the end.
    pub eta_seconds: u64,
}

/// Called by the walker and the chapter loop as work progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait DownloadProgressCallback: Send + Sync {
    /// Human-readable status line ("Downloading image 3/20...").
    fn on_status(&self, message: &str) {
        let _ = message;
    }

    /// Overall progress in percent, always within `0..=100`.
    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    /// Session statistics; see [`SessionStats`].
    fn on_stats(&self, stats: &SessionStats) {
        let _ = stats;
    }

    /// A chapter attempt begins.
    ///
    /// # Arguments
    /// * `display_index`: 1-based position of the chapter in the walk (or in
    ///   the detected chapter list when one is known)
    /// * `total`: detected or requested chapter total, 0 when unknown
    /// * `url`: the chapter page
    fn on_chapter_start(&self, display_index: usize, total: usize, url: &str) {
        let _ = (display_index, total, url);
    }

    /// A chapter's document was written.
    fn on_chapter_complete(&self, label: &str, pdf_path: &Path, images: usize) {
        let _ = (label, pdf_path, images);
    }

    /// A chapter failed and will be skipped.
    fn on_chapter_failed(&self, label: &str, error: &str) {
        let _ = (label, error);
    }

    /// The walk has ended.
    fn on_walk_complete(&self, downloaded: usize, failed: usize) {
        let _ = (downloaded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl DownloadProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DownloadConfig`].
pub type ProgressCallback = Arc<dyn DownloadProgressCallback>;

/// Maps a single chapter's 0–100 progress into that chapter's slice of the
/// overall bar when the total chapter count is known.
///
/// Every other event is forwarded untouched.
pub(crate) struct ChapterSliceCallback {
    inner: ProgressCallback,
    /// 0-based position of the current chapter.
    index: usize,
    total: usize,
}

impl ChapterSliceCallback {
    pub(crate) fn new(inner: ProgressCallback, index: usize, total: usize) -> Self {
        Self {
            inner,
            index,
            total: total.max(1),
        }
    }

    pub(crate) fn overall(&self, chapter_percent: u8) -> u8 {
        let chapter = f64::from(chapter_percent.min(100)) / 100.0;
        let overall = (self.index as f64 + chapter) / self.total as f64 * 100.0;
        overall.clamp(0.0, 100.0) as u8
    }
}

impl DownloadProgressCallback for ChapterSliceCallback {
    fn on_status(&self, message: &str) {
        self.inner.on_status(message);
    }

    fn on_progress(&self, percent: u8) {
        self.inner.on_progress(self.overall(percent));
    }

    fn on_stats(&self, stats: &SessionStats) {
        self.inner.on_stats(stats);
    }

    fn on_chapter_start(&self, display_index: usize, total: usize, url: &str) {
        self.inner.on_chapter_start(display_index, total, url);
    }

    fn on_chapter_complete(&self, label: &str, pdf_path: &Path, images: usize) {
        self.inner.on_chapter_complete(label, pdf_path, images);
    }

    fn on_chapter_failed(&self, label: &str, error: &str) {
        self.inner.on_chapter_failed(label, error);
    }

    fn on_walk_complete(&self, downloaded: usize, failed: usize) {
        self.inner.on_walk_complete(downloaded, failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TrackingCallback {
        completes: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
        last_percent: Arc<Mutex<Option<u8>>>,
    }

    impl DownloadProgressCallback for TrackingCallback {
        fn on_progress(&self, percent: u8) {
            *self.last_percent.lock().unwrap() = Some(percent);
        }

        fn on_chapter_complete(&self, _label: &str, _pdf_path: &Path, _images: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chapter_failed(&self, _label: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracker() -> TrackingCallback {
        TrackingCallback {
            completes: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            last_percent: Arc::new(Mutex::new(None)),
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_status("hello");
        cb.on_progress(50);
        cb.on_stats(&SessionStats::default());
        cb.on_chapter_start(1, 0, "https://example.com/c/1");
        cb.on_chapter_complete("Chapter_001", Path::new("x.pdf"), 3);
        cb.on_chapter_failed("Chapter_002", "boom");
        cb.on_walk_complete(1, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = tracker();
        t.on_chapter_complete("Chapter_001", Path::new("a.pdf"), 10);
        t.on_chapter_complete("Chapter_002", Path::new("b.pdf"), 12);
        t.on_chapter_failed("Chapter_003", "no images");
        assert_eq!(t.completes.load(Ordering::SeqCst), 2);
        assert_eq!(t.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slice_maps_chapter_percent_into_overall_bar() {
        let t = Arc::new(tracker());
        let last = t.last_percent.clone();
        // third of four chapters: slice is 50..75
        let slice = ChapterSliceCallback::new(t as ProgressCallback, 2, 4);
        slice.on_progress(0);
        assert_eq!(*last.lock().unwrap(), Some(50));
        slice.on_progress(100);
        assert_eq!(*last.lock().unwrap(), Some(75));
        slice.on_progress(50);
        assert_eq!(*last.lock().unwrap(), Some(62));
    }

    #[test]
    fn slice_never_exceeds_hundred() {
        let slice = ChapterSliceCallback::new(Arc::new(NoopProgressCallback), 9, 3);
        assert_eq!(slice.overall(100), 100);
    }
}
