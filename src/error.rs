//! Error types for the mangapdf library.
//!
//! The split mirrors the way a walk degrades:
//!
//! * [`DownloadError`]: **Fatal**: the session cannot start at all (no HTTP
//!   client, output folder cannot be created, invalid configuration).
//!   Returned as `Err` from the top-level entry points.
//!
//! * [`ChapterError`]: **Non-fatal**: one chapter failed (no images, every
//!   image failed, document write failed). The walker counts it against the
//!   consecutive-failure budget and skips to the next chapter.
//!
//! * [`ManifestError`]: the session ledger could not be read or written.
//!   The walker logs it and keeps downloading; the merger reports it and
//!   refuses to guess which files are "new".
//!
//! * [`MergeError`]: the merge target is unusable or a bundle could not be
//!   written.
//!
//! * [`QueueError`]: the queue file is missing or malformed.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the download entry points.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The page session (HTTP client, browser) could not be opened.
    #[error("Could not open a browsing session: {reason}")]
    SessionUnavailable { reason: String },

    /// The output folder could not be created.
    #[error("Failed to create output folder '{path}': {source}")]
    OutputFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by a [`crate::page::PageSession`] implementation.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The page could not be loaded.
    #[error("Failed to load '{url}': {detail}")]
    Navigation { url: String, detail: String },

    /// The server answered with a non-success status while navigating.
    #[error("HTTP {status} while loading '{url}'")]
    Status { url: String, status: u16 },

    /// A resource fetch failed at the transport level.
    #[error("Failed to fetch '{url}': {detail}")]
    Fetch { url: String, detail: String },

    /// An operation needed a loaded page but none was loaded yet.
    #[error("No page is loaded")]
    NoPage,
}

/// A non-fatal failure of a single chapter.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChapterError {
    /// The chapter page could not be loaded.
    #[error("{chapter}: page could not be loaded: {detail}")]
    PageLoad { chapter: String, detail: String },

    /// The page loaded but no qualifying image links were found.
    #[error("No images found in {chapter}! URL: {url}")]
    NoImages { chapter: String, url: String },

    /// Every image failed after its retry budget.
    #[error("All {total} images in {chapter} failed! URL: {url}")]
    AllImagesFailed {
        chapter: String,
        url: String,
        total: usize,
    },

    /// The chapter folder could not be created.
    #[error("{chapter}: could not create folder '{path}': {detail}")]
    Folder {
        chapter: String,
        path: PathBuf,
        detail: String,
    },

    /// The PDF for the chapter could not be assembled.
    #[error("{chapter}: document assembly failed: {detail}")]
    Document { chapter: String, detail: String },

    /// A stop was requested while the chapter was in progress.
    #[error("{chapter}: cancelled")]
    Cancelled { chapter: String },
}

impl ChapterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChapterError::Cancelled { .. })
    }
}

/// Failures while turning saved images into a PDF.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// None of the input images could be decoded.
    #[error("No decodable images to place on pages")]
    NoPages,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Assembly task failed: {0}")]
    Join(String),
}

/// The queue file could not be read.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to read queue file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Queue file '{path}' is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Session-ledger failures. Always degradations, never walk-fatal.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest '{path}' is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `latest_manifest.txt` does not exist in the folder.
    #[error("No manifest pointer in '{folder}'")]
    PointerMissing { folder: PathBuf },

    /// The pointer names a manifest that no longer exists.
    #[error("Manifest pointer refers to a missing file: '{path}'")]
    Dangling { path: PathBuf },

    /// The manifest exists but lists no chapter PDF that is still on disk.
    #[error("Manifest '{path}' lists no existing chapter PDFs")]
    Empty { path: PathBuf },
}

/// Failures of the bundle merger.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Folder not found: '{path}'")]
    FolderNotFound { path: PathBuf },

    #[error("Bundle size must be at least 1")]
    InvalidBundleSize,

    #[error("Failed to merge into '{path}': {detail}")]
    Pdf { path: PathBuf, detail: String },

    #[error("File operation on '{path}' failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Merge task failed: {0}")]
    Join(String),
}
