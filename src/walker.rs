//! Chapter walker: download chapter after chapter by following "next" links.
//!
//! One walk is one session of the [`DownloadController`]. The loop checks,
//! in order, before every chapter:
//!
//! 1. stop requested → end
//! 2. paused → wait (a stop during the wait ends the walk)
//! 3. manual mode and the requested count reached → end
//! 4. safety limit reached (any mode) → end
//! 5. consecutive failure limit reached → end
//!
//! then attempts one chapter. A failed chapter is skipped by following the
//! failed page's next link; a missing next link always ends the walk, even
//! when the detected chapter total says more should exist.

use crate::chapter::{chapter_file_name, label_from_url, token_from_label};
use crate::config::{DownloadConfig, WalkMode};
use crate::controller::DownloadController;
use crate::error::{ChapterError, DownloadError};
use crate::error_log::ErrorLog;
use crate::manifest::{self, SessionManifest};
use crate::page::PageSession;
use crate::pipeline::detect::{detect_chapter_count, display_index};
use crate::pipeline::document::assemble_document;
use crate::pipeline::extract::{extract_image_links, find_next_chapter_url};
use crate::pipeline::fetch::{fetch_chapter_images, FetchContext};
use crate::pipeline::identify::identify_chapter;
use crate::pipeline::paginate::{images_per_page, tallest_image};
use crate::progress::{
    ChapterSliceCallback, DownloadProgressCallback, NoopProgressCallback, ProgressCallback,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// A stop was requested.
    Stopped,
    /// Manual mode downloaded the requested number of chapters.
    TargetReached,
    /// The per-walk chapter safety limit was hit.
    SafetyLimit,
    /// Too many chapters failed in a row.
    TooManyFailures,
    /// The last page had no usable next-chapter link.
    NoNextChapter,
}

/// A chapter whose document was written.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterOutcome {
    pub label: String,
    pub url: String,
    pub pdf_path: PathBuf,
    pub images_saved: usize,
    pub images_failed: usize,
    pub pages: usize,
}

/// Result of a walk.
#[derive(Debug, Clone, Serialize)]
pub struct WalkSummary {
    pub downloaded: usize,
    /// Consecutive failures at the end of the walk.
    pub failed: usize,
    /// Every chapter failure during the walk.
    pub failures: Vec<ChapterError>,
    pub images: usize,
    /// Running time, pauses excluded.
    pub elapsed: Duration,
    pub output_folder: PathBuf,
    pub stop_reason: StopReason,
    pub chapters: Vec<ChapterOutcome>,
    /// Kept manifest, when the walk was asked to keep it.
    pub manifest_path: Option<PathBuf>,
    /// Error log, when anything was written to it.
    pub error_log: Option<PathBuf>,
}

/// Format seconds as `MM:SS`, or `HH:MM:SS` from one hour on.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 3600 {
        format!("{:02}:{:02}", secs / 60, secs % 60)
    } else {
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Walk chapters starting at `start_url`, writing one PDF per chapter into
/// `output_folder`.
///
/// # Errors
/// Only setup failures are returned as `Err`: the output folder cannot be
/// created. Chapter failures are counted and reported in the summary.
pub async fn download_chapters<S: PageSession + ?Sized>(
    session: &mut S,
    controller: &DownloadController,
    start_url: &str,
    output_folder: &Path,
    config: &DownloadConfig,
) -> Result<WalkSummary, DownloadError> {
    controller.reset();
    controller.start();

    let noop: ProgressCallback = Arc::new(NoopProgressCallback);
    let progress = config.progress_callback.clone().unwrap_or(noop);
    let auto = config.mode.is_auto();

    tokio::fs::create_dir_all(output_folder)
        .await
        .map_err(|source| DownloadError::OutputFolder {
            path: output_folder.to_path_buf(),
            source,
        })?;
    let error_log = ErrorLog::in_folder(output_folder);

    // ── Session manifest ─────────────────────────────────────────────────
    let record = SessionManifest::new(&config.manga_title, output_folder, start_url, config.mode);
    match record.create(output_folder) {
        Ok(path) => {
            controller.set_manifest_path(Some(path));
            progress.on_status("Session manifest created");
        }
        Err(e) => {
            warn!("Continuing without a session manifest: {e}");
            controller.set_manifest_path(None);
        }
    }

    // ── Chapter-count detection ──────────────────────────────────────────
    if auto {
        detect_total(session, controller, start_url, config, progress.as_ref()).await;
    }

    info!("Walk started at {start_url} ({:?})", config.mode);
    progress.on_status("Multi-chapter download started");
    progress.on_status(&match config.mode {
        WalkMode::Auto => "Mode: automatic".to_string(),
        WalkMode::Manual { max_chapters } => format!("Mode: manual ({max_chapters} chapters)"),
    });

    let mut current_url = start_url.to_string();
    let mut downloaded = 0usize;
    let mut failed = 0usize;
    let mut failures: Vec<ChapterError> = Vec::new();
    let mut chapters: Vec<ChapterOutcome> = Vec::new();

    let stop_reason = loop {
        if controller.is_stopped() {
            progress.on_status("Download cancelled");
            break StopReason::Stopped;
        }
        if !controller.wait_while_paused().await {
            progress.on_status("Download cancelled");
            break StopReason::Stopped;
        }
        if let WalkMode::Manual { max_chapters } = config.mode {
            if downloaded >= max_chapters {
                progress.on_status(&format!("Target reached: {max_chapters} chapters"));
                break StopReason::TargetReached;
            }
        }
        if downloaded >= config.max_chapters_limit {
            progress.on_status(&format!("Safety limit reached: {}", config.max_chapters_limit));
            break StopReason::SafetyLimit;
        }
        if failed >= config.max_chapter_failures {
            progress.on_status(&format!("Too many failures: {failed}"));
            break StopReason::TooManyFailures;
        }

        let total = chapters_total(config.mode, controller);
        let position = downloaded + 1;
        progress.on_status(&match total {
            0 => format!("Chapter {position}/Auto"),
            n => format!("Chapter {position}/{n}"),
        });
        progress.on_status(&current_url);
        progress.on_chapter_start(position, total, &current_url);

        if total > 0 {
            progress.on_progress(((downloaded * 100) / total).min(100) as u8);
        }
        let mut stats = controller.stats(total);
        if auto && controller.display_index() > 0 {
            stats.chapters_done = controller.display_index();
        }
        progress.on_stats(&stats);

        let chapter_progress: ProgressCallback = if auto && total > 0 {
            Arc::new(ChapterSliceCallback::new(progress.clone(), downloaded, total))
        } else {
            progress.clone()
        };

        match attempt_chapter(
            session,
            controller,
            &current_url,
            output_folder,
            config,
            chapter_progress.as_ref(),
            &error_log,
        )
        .await
        {
            Ok(outcome) => {
                downloaded += 1;
                failed = 0;
                progress.on_chapter_complete(&outcome.label, &outcome.pdf_path, outcome.images_saved);
                chapters.push(outcome);

                if auto && controller.display_index() > 0 {
                    let cap = controller.detected_total().max(1);
                    controller.set_display_index((controller.display_index() + 1).min(cap));
                }

                match find_next_chapter_url(&*session) {
                    Some(next) => {
                        current_url = next;
                        progress.on_status("Moving to the next chapter...");
                        if !controller.sleep(config.timing.chapter_delay).await {
                            progress.on_status("Download cancelled");
                            break StopReason::Stopped;
                        }
                    }
                    None => {
                        progress.on_status("No further chapter found, finishing.");
                        break StopReason::NoNextChapter;
                    }
                }
            }
            Err(e) if e.is_cancelled() => {
                progress.on_status("Download cancelled");
                break StopReason::Stopped;
            }
            Err(e) => {
                failed += 1;
                let label = chapter_label_of(&e);
                error_log.append(&e.to_string()).await;
                progress.on_chapter_failed(&label, &e.to_string());
                progress.on_status(&format!(
                    "Chapter {position} failed ({failed}/{})",
                    config.max_chapter_failures
                ));
                failures.push(e);

                if failed < config.max_chapter_failures {
                    // a page that never loaded leaves the previous one in the
                    // session, whose next link points back at the failed URL
                    match find_next_chapter_url(&*session) {
                        Some(next) if next != current_url => {
                            current_url = next;
                            progress.on_status("Skipping to the next chapter...");
                        }
                        Some(_) => {
                            warn!("No way past unreachable chapter {current_url}");
                            progress.on_status("Next chapter unreachable, finishing.");
                            break StopReason::NoNextChapter;
                        }
                        None => break StopReason::NoNextChapter,
                    }
                }
            }
        }
    };

    // ── Wrap-up ──────────────────────────────────────────────────────────
    let elapsed = controller.running_elapsed();
    let total = chapters_total(config.mode, controller);
    let mut stats = controller.stats(total);
    stats.chapters_done = downloaded;
    stats.eta_seconds = 0;
    progress.on_stats(&stats);

    if stop_reason != StopReason::Stopped {
        controller.complete();
    }

    let images = controller.images_total();
    progress.on_status(&"-".repeat(60));
    progress.on_status("DOWNLOAD FINISHED");
    progress.on_status(&format!("Downloaded: {downloaded} chapters"));
    progress.on_status(&format!("Images: {images}"));
    progress.on_status(&format!("Time: {}", format_elapsed(elapsed)));
    progress.on_status(&format!("Failed: {failed} chapters"));
    progress.on_status(&format!("Folder: {}", output_folder.display()));
    if error_log.exists() {
        progress.on_status(&format!("Error log: {}", error_log.path().display()));
    }

    let mut manifest_path = controller.manifest_path();
    if !config.keep_manifest {
        if let Err(e) = manifest::cleanup(output_folder) {
            warn!("Could not remove session manifest: {e}");
        }
        manifest_path = None;
    }
    progress.on_status(&"-".repeat(60));
    progress.on_walk_complete(downloaded, failed);

    info!(
        "Walk finished: {downloaded} chapter(s), {failed} failure(s), {images} image(s) in {} ({stop_reason:?})",
        format_elapsed(elapsed)
    );

    Ok(WalkSummary {
        downloaded,
        failed,
        failures,
        images,
        elapsed,
        output_folder: output_folder.to_path_buf(),
        stop_reason,
        chapters,
        manifest_path,
        error_log: error_log.exists().then(|| error_log.path().to_path_buf()),
    })
}

/// Download exactly one chapter. Resets `controller` first; writes no
/// manifest.
pub async fn download_single_chapter<S: PageSession + ?Sized>(
    session: &mut S,
    controller: &DownloadController,
    url: &str,
    output_folder: &Path,
    config: &DownloadConfig,
) -> Result<ChapterOutcome, ChapterError> {
    controller.reset();
    controller.start();

    let noop: ProgressCallback = Arc::new(NoopProgressCallback);
    let progress = config.progress_callback.clone().unwrap_or(noop);
    let error_log = ErrorLog::in_folder(output_folder);

    let result = attempt_chapter(
        session,
        controller,
        url,
        output_folder,
        config,
        progress.as_ref(),
        &error_log,
    )
    .await;

    match &result {
        Ok(outcome) => {
            controller.complete();
            progress.on_chapter_complete(&outcome.label, &outcome.pdf_path, outcome.images_saved);
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            controller.complete();
            error_log.append(&e.to_string()).await;
            progress.on_chapter_failed(&chapter_label_of(e), &e.to_string());
        }
    }
    result
}

/// Chapter total used for progress and stats: the requested count in manual
/// mode, the detected count (or 0) in auto mode.
fn chapters_total(mode: WalkMode, controller: &DownloadController) -> usize {
    match mode {
        WalkMode::Manual { max_chapters } => max_chapters,
        WalkMode::Auto => controller.detected_total(),
    }
}

/// Load the start page, count chapters in its picker and place the start
/// chapter in that list.
async fn detect_total<S: PageSession + ?Sized>(
    session: &mut S,
    controller: &DownloadController,
    start_url: &str,
    config: &DownloadConfig,
    progress: &dyn DownloadProgressCallback,
) {
    if let Err(e) = session.navigate(start_url).await {
        debug!("Chapter-count detection skipped: {e}");
        progress.on_status("Chapter count detection skipped");
        return;
    }
    progress.on_status(&format!(
        "Waiting {}s for chapter detection...",
        config.timing.settle_delay.as_secs()
    ));
    if !controller.sleep(config.timing.settle_delay).await {
        return;
    }

    let detected = detect_chapter_count(&*session);
    controller.set_detected(detected.count, detected.values.clone());
    if detected.count == 0 {
        progress.on_status("Chapter count could not be detected");
        return;
    }
    progress.on_status(&format!("Chapters detected: {}", detected.count));

    let label = identify_chapter(&*session, start_url);
    if let Some(index) = token_from_label(&label)
        .and_then(|token| display_index(&detected.values, token.value()))
    {
        debug!("Start chapter {label} is #{index} of {}", detected.count);
        controller.set_display_index(index);
    }
}

/// One chapter end to end: load, label, extract, fetch, assemble, record.
async fn attempt_chapter<S: PageSession + ?Sized>(
    session: &mut S,
    controller: &DownloadController,
    url: &str,
    output_folder: &Path,
    config: &DownloadConfig,
    progress: &dyn DownloadProgressCallback,
    error_log: &ErrorLog,
) -> Result<ChapterOutcome, ChapterError> {
    let result =
        run_chapter(session, controller, url, output_folder, config, progress, error_log).await;
    if let Err(e) = &result {
        if !e.is_cancelled() {
            progress.on_progress(0);
        }
    }
    result
}

async fn run_chapter<S: PageSession + ?Sized>(
    session: &mut S,
    controller: &DownloadController,
    url: &str,
    output_folder: &Path,
    config: &DownloadConfig,
    progress: &dyn DownloadProgressCallback,
    error_log: &ErrorLog,
) -> Result<ChapterOutcome, ChapterError> {
    let cancelled = |chapter: String| ChapterError::Cancelled { chapter };
    if controller.is_stopped() {
        return Err(cancelled(label_from_url(url)));
    }

    session
        .navigate(url)
        .await
        .map_err(|e| ChapterError::PageLoad {
            chapter: label_from_url(url),
            detail: e.to_string(),
        })?;
    progress.on_status(&format!(
        "Waiting {}s for the page to load...",
        config.timing.settle_delay.as_secs()
    ));
    if !controller.sleep(config.timing.settle_delay).await {
        return Err(cancelled(label_from_url(url)));
    }

    let session: &S = session;
    let label = identify_chapter(session, url);
    let folder = output_folder.join(&label);
    tokio::fs::create_dir_all(&folder)
        .await
        .map_err(|e| ChapterError::Folder {
            chapter: label.clone(),
            path: folder.clone(),
            detail: e.to_string(),
        })?;
    progress.on_status(&format!("Folder: {label}"));

    let links = extract_image_links(session);
    if links.is_empty() {
        return Err(ChapterError::NoImages {
            chapter: label,
            url: url.to_string(),
        });
    }
    progress.on_status(&format!("{} images found, downloading...", links.len()));

    let ctx = FetchContext {
        controller,
        config,
        progress,
        error_log,
    };
    let images = fetch_chapter_images(session, &links, &folder, &label, &ctx).await?;

    let tallest = tallest_image(&images.saved);
    let per_page = images_per_page(tallest);
    progress.on_status(&format!(
        "PDF layout: {per_page} images/page (tallest image: {tallest}px)"
    ));

    progress.on_progress(92);
    let pdf_path = output_folder.join(chapter_file_name(&label, &config.manga_title));
    progress.on_status("Creating PDF...");
    let document = assemble_document(
        images.saved.clone(),
        pdf_path.clone(),
        config.encode,
        per_page,
    )
    .await
    .map_err(|e| ChapterError::Document {
        chapter: label.clone(),
        detail: e.to_string(),
    })?;

    if let Some(manifest_path) = controller.manifest_path() {
        if let Err(e) = manifest::append_entry(&manifest_path, &label, &pdf_path) {
            warn!("Session manifest degraded, {label} not recorded: {e}");
        }
    }

    progress.on_progress(100);
    progress.on_status(&format!("{label} done! ({} images)", images.saved.len()));

    if config.delete_images_after_pdf {
        match tokio::fs::remove_dir_all(&folder).await {
            Ok(()) => progress.on_status("Chapter images deleted (after PDF)"),
            Err(e) => {
                error_log
                    .append(&format!(
                        "Could not delete chapter folder {}: {e}",
                        folder.display()
                    ))
                    .await
            }
        }
    }

    controller.record_chapter();

    Ok(ChapterOutcome {
        label,
        url: url.to_string(),
        pdf_path,
        images_saved: images.saved.len(),
        images_failed: images.failed,
        pages: document.pages,
    })
}

fn chapter_label_of(e: &ChapterError) -> String {
    match e {
        ChapterError::PageLoad { chapter, .. }
        | ChapterError::NoImages { chapter, .. }
        | ChapterError::AllImagesFailed { chapter, .. }
        | ChapterError::Folder { chapter, .. }
        | ChapterError::Document { chapter, .. }
        | ChapterError::Cancelled { chapter } => chapter.clone(),
    }
}
