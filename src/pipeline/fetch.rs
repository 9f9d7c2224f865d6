//! Per-chapter image download loop.
//!
//! Images are fetched one at a time through the page session (same cookies,
//! `Referer` set to the chapter page), re-encoded on the blocking pool and
//! written as `001.jpg`, `002.jpg`, … in the chapter folder. A failed image
//! is retried, then skipped; the chapter only fails when nothing was saved.

use crate::config::DownloadConfig;
use crate::controller::DownloadController;
use crate::error::ChapterError;
use crate::error_log::ErrorLog;
use crate::page::PageSession;
use crate::pipeline::encode::{reencode, EncodedImage};
use crate::progress::DownloadProgressCallback;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything the loop needs besides the session.
pub struct FetchContext<'a> {
    pub controller: &'a DownloadController,
    pub config: &'a DownloadConfig,
    pub progress: &'a dyn DownloadProgressCallback,
    pub error_log: &'a ErrorLog,
}

/// Outcome of the loop for one chapter.
#[derive(Debug, Clone, Default)]
pub struct ChapterImages {
    /// Files written, in page order.
    pub saved: Vec<PathBuf>,
    pub failed: usize,
    pub total: usize,
}

enum ImageOutcome {
    Saved,
    Failed(String),
    Cancelled,
}

/// Progress for image `index` of `total` (1-based), within `10..=90`.
pub fn image_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 10;
    }
    let pct = 10 + (80 * index) / total;
    pct.clamp(10, 90) as u8
}

/// Download `links` into `folder`.
///
/// Returns [`ChapterError::Cancelled`] when a stop is observed and
/// [`ChapterError::AllImagesFailed`] when nothing could be saved.
pub async fn fetch_chapter_images<S: PageSession + ?Sized>(
    session: &S,
    links: &[String],
    folder: &Path,
    label: &str,
    ctx: &FetchContext<'_>,
) -> Result<ChapterImages, ChapterError> {
    let total = links.len();
    let page_url = session.current_url().unwrap_or_default();
    let headers = vec![("Referer".to_string(), page_url.clone())];
    let cancelled = || ChapterError::Cancelled {
        chapter: label.to_string(),
    };

    let mut result = ChapterImages {
        total,
        ..ChapterImages::default()
    };
    ctx.progress.on_progress(10);

    for (i, link) in links.iter().enumerate() {
        let index = i + 1;
        if !ctx.controller.wait_while_paused().await {
            return Err(cancelled());
        }

        let path = folder.join(format!("{index:03}.jpg"));
        match fetch_image(session, link, &headers, &path, index, ctx).await {
            ImageOutcome::Saved => {
                ctx.controller.add_images(1);
                ctx.progress.on_status(&format!("{index}/{total}: {index:03}.jpg"));
                result.saved.push(path);
            }
            ImageOutcome::Failed(detail) => {
                result.failed += 1;
                ctx.error_log
                    .append(&format!(
                        "Image {index} in {label} could not be downloaded: {link} ({detail})"
                    ))
                    .await;
                ctx.progress.on_status(&format!("Image {index} skipped"));
            }
            ImageOutcome::Cancelled => return Err(cancelled()),
        }

        ctx.progress.on_progress(image_progress(index, total));

        if !ctx.controller.sleep(ctx.config.timing.image_delay).await {
            return Err(cancelled());
        }
    }

    if result.saved.is_empty() {
        return Err(ChapterError::AllImagesFailed {
            chapter: label.to_string(),
            url: page_url,
            total,
        });
    }
    if result.failed > 0 {
        ctx.progress
            .on_status(&format!("{} of {total} images failed", result.failed));
    }
    Ok(result)
}

async fn fetch_image<S: PageSession + ?Sized>(
    session: &S,
    url: &str,
    headers: &[(String, String)],
    path: &Path,
    index: usize,
    ctx: &FetchContext<'_>,
) -> ImageOutcome {
    let attempts = ctx.config.image_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match session.fetch(url, headers).await {
            Ok(response) if response.is_ok() => {
                match store_image(response.bytes, path, ctx).await {
                    Ok(()) => return ImageOutcome::Saved,
                    Err(e) => last_error = e,
                }
            }
            Ok(response) => {
                last_error = format!("HTTP {}", response.status);
                ctx.progress.on_status(&format!(
                    "HTTP {} for image {index} (attempt {attempt})",
                    response.status
                ));
            }
            Err(e) => {
                last_error = e.to_string();
                ctx.progress
                    .on_status(&format!("Error on image {index} (attempt {attempt})"));
            }
        }
        debug!("Image {index} attempt {attempt}/{attempts} failed: {last_error}");

        if !ctx.controller.sleep(ctx.config.timing.retry_backoff).await {
            return ImageOutcome::Cancelled;
        }
    }

    warn!("Image {index} failed after {attempts} attempt(s): {last_error}");
    ImageOutcome::Failed(last_error)
}

async fn store_image(bytes: Vec<u8>, path: &Path, ctx: &FetchContext<'_>) -> Result<(), String> {
    let settings = ctx.config.encode;
    let encoded = tokio::task::spawn_blocking(move || reencode(bytes, &settings))
        .await
        .map_err(|e| format!("encode task failed: {e}"))?
        .map_err(|e| format!("encode failed: {e}"))?;

    if let EncodedImage::Original(_) = encoded {
        debug!("Saving '{}' unmodified", path.display());
    }
    tokio::fs::write(path, encoded.bytes())
        .await
        .map_err(|e| format!("write '{}' failed: {e}", path.display()))
}
