//! # mangapdf
//!
//! Walk a paginated chapter site, turn every chapter's images into one PDF,
//! and regroup chapter PDFs into numbered bundles.
//!
//! ## Pipeline Overview
//!
//! ```text
//! start URL
//!  │
//!  ├─ 1. Detect    estimate the chapter total from the start page (auto mode)
//!  ├─ 2. Identify  Chapter_NNN from the page marker or the URL
//!  ├─ 3. Extract   image URLs + next-chapter link
//!  ├─ 4. Fetch     download with retries, re-encode to JPEG (spawn_blocking)
//!  ├─ 5. Document  stack images onto PDF pages (spawn_blocking)
//!  └─ 6. Next      follow the link, or stop on mode / limit / failures
//!
//! chapter PDFs ──▶ merge ──▶ Chapter_001-005 - Title.pdf
//! ```
//!
//! Every walk records the PDFs it wrote in a session manifest, so a merge
//! right after the walk can bundle only this session's chapters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mangapdf::{download_chapters, DownloadConfig, DownloadController, HttpPageSession, WalkMode};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DownloadConfig::builder()
//!         .manga_title("Some Series")
//!         .mode(WalkMode::Manual { max_chapters: 5 })
//!         .build()?;
//!     let mut session = HttpPageSession::from_config(&config)?;
//!     let controller = DownloadController::new();
//!     let summary = download_chapters(
//!         &mut session,
//!         &controller,
//!         "https://example.com/series/some-series-ch-1",
//!         Path::new("downloads/some-series"),
//!         &config,
//!     )
//!     .await?;
//!     eprintln!("{} chapters in {:?}", summary.downloaded, summary.elapsed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mangapdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mangapdf = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod chapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod error_log;
pub mod manifest;
pub mod merge;
pub mod page;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod walker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use chapter::ChapterToken;
pub use config::{
    DownloadConfig, DownloadConfigBuilder, EncodeSettings, MergeConfig, MergeSource, Timing,
    WalkMode,
};
pub use controller::{DownloadController, RunState};
pub use error::{
    ChapterError, DocumentError, DownloadError, ManifestError, MergeError, QueueError,
    SessionError,
};
pub use merge::{merge_chapter_pdfs, merge_chapter_pdfs_async, MergeReport, MergedBundle};
pub use page::{FetchResponse, HttpPageSession, PageElement, PageSession};
pub use progress::{DownloadProgressCallback, NoopProgressCallback, ProgressCallback, SessionStats};
pub use queue::{run_queue, ItemState, QueueController, QueueItem, QueueReport};
pub use walker::{
    download_chapters, download_single_chapter, format_elapsed, ChapterOutcome, StopReason,
    WalkSummary,
};
