//! Sequential queue of walks, each optionally followed by a bundle merge.
//!
//! Items run one after another on a single page session. A
//! [`QueueController`] interrupts the queue in two strengths: a skip ends
//! only the current item, a stop ends the item and the queue.
//!
//! ```json
//! [
//!   {
//!     "url": "https://example.com/series/a/chapter-1",
//!     "title": "Series A",
//!     "folder": "downloads/a",
//!     "mode": "manual",
//!     "max_chapters": 10,
//!     "merge_after": { "chapters_per_bundle": 5, "only_new": true }
//!   }
//! ]
//! ```

use crate::config::{DownloadConfig, MergeConfig, MergeSource, WalkMode};
use crate::controller::DownloadController;
use crate::error::{DownloadError, QueueError};
use crate::manifest;
use crate::merge::{merge_chapter_pdfs_async, ORIGINALS_DIR};
use crate::page::PageSession;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::walker::{download_chapters, StopReason};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

// ── Queue items ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Manual,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl ItemState {
    /// Whether a queue run picks the item up.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed | Self::Skipped)
    }
}

/// Merge to run once an item's walk has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAfter {
    #[serde(default = "default_bundle_size")]
    pub chapters_per_bundle: usize,
    /// Merge only the chapters of this walk (via its session manifest).
    #[serde(default)]
    pub only_new: bool,
    /// Remove `_originals/` after a successful merge.
    #[serde(default)]
    pub delete_originals: bool,
}

fn default_bundle_size() -> usize {
    3
}

impl Default for MergeAfter {
    fn default() -> Self {
        Self {
            chapters_per_bundle: default_bundle_size(),
            only_new: false,
            delete_originals: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Empty means the queue's default folder.
    #[serde(default)]
    pub folder: PathBuf,
    #[serde(default)]
    pub mode: QueueMode,
    #[serde(default)]
    pub max_chapters: usize,
    #[serde(default)]
    pub delete_images: bool,
    #[serde(default)]
    pub merge_after: Option<MergeAfter>,
    #[serde(default)]
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

impl QueueItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn walk_mode(&self) -> WalkMode {
        match self.mode {
            QueueMode::Auto => WalkMode::Auto,
            QueueMode::Manual => WalkMode::Manual {
                max_chapters: self.max_chapters,
            },
        }
    }

    /// Name shown in status lines: the title, or the URL when untitled.
    pub fn display_name(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            self.title.trim()
        }
    }

    /// Per-item walk configuration on top of the queue's shared settings.
    pub fn download_config(&self, base: &DownloadConfig) -> Result<DownloadConfig, DownloadError> {
        let title = match self.title.trim() {
            "" => base.manga_title.clone(),
            t => t.to_string(),
        };
        let keep_manifest = self.merge_after.as_ref().is_some_and(|m| m.only_new);
        let mut builder = DownloadConfig::builder()
            .manga_title(title)
            .mode(self.walk_mode())
            .encode(base.encode)
            .timing(base.timing)
            .max_chapters_limit(base.max_chapters_limit)
            .max_chapter_failures(base.max_chapter_failures)
            .image_attempts(base.image_attempts)
            .delete_images_after_pdf(self.delete_images)
            .keep_manifest(keep_manifest)
            .user_agent(base.user_agent.clone())
            .request_timeout_secs(base.request_timeout_secs);
        if let Some(cb) = &base.progress_callback {
            builder = builder.progress_callback(Arc::clone(cb));
        }
        builder.build()
    }

    fn output_folder(&self, default_folder: &Path) -> PathBuf {
        if self.folder.as_os_str().is_empty() {
            default_folder.to_path_buf()
        } else {
            self.folder.clone()
        }
    }
}

/// Read a queue from a JSON array of items.
pub fn load_queue(path: &Path) -> Result<Vec<QueueItem>, QueueError> {
    let text = std::fs::read_to_string(path).map_err(|source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| QueueError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the queue back, item states included.
pub fn save_queue(path: &Path, items: &[QueueItem]) -> Result<(), QueueError> {
    let json = serde_json::to_string_pretty(items).map_err(|source| QueueError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Controller ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    None,
    Skip,
    Stop,
}

/// Pause, skip and stop handle for a running queue.
#[derive(Debug, Clone)]
pub struct QueueController {
    download: DownloadController,
    interrupt: Arc<watch::Sender<Interrupt>>,
}

impl Default for QueueController {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Interrupt::None);
        Self {
            download: DownloadController::new(),
            interrupt: Arc::new(tx),
        }
    }

    /// Controller of the walk currently running (pause, resume, stats).
    pub fn download(&self) -> &DownloadController {
        &self.download
    }

    /// End the current item and mark it skipped; the queue goes on.
    pub fn skip_current(&self) {
        self.interrupt.send_if_modified(|i| {
            if *i == Interrupt::None {
                *i = Interrupt::Skip;
                true
            } else {
                false
            }
        });
        self.download.stop();
    }

    /// End the current item and the queue.
    pub fn stop_all(&self) {
        self.interrupt.send_replace(Interrupt::Stop);
        self.download.stop();
    }

    pub fn is_stopped(&self) -> bool {
        *self.interrupt.borrow() == Interrupt::Stop
    }

    fn take_skip(&self) -> bool {
        let mut skipped = false;
        self.interrupt.send_if_modified(|i| {
            skipped = *i == Interrupt::Skip;
            if skipped {
                *i = Interrupt::None;
            }
            skipped
        });
        skipped
    }

    /// Resolves once a skip or stop is requested.
    async fn interrupted(&self) {
        let mut rx = self.interrupt.subscribe();
        loop {
            if *rx.borrow_and_update() != Interrupt::None {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────────────

/// Counts of a queue run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run ended on a stop before every item was processed.
    pub stopped: bool,
}

/// Run every runnable item of `items` in order, updating their states.
///
/// `base` carries the settings shared by all items (encoding, timing,
/// limits, progress callback); each item supplies title, mode and folder.
pub async fn run_queue<S: PageSession + ?Sized>(
    session: &mut S,
    queue: &QueueController,
    items: &mut [QueueItem],
    default_folder: &Path,
    base: &DownloadConfig,
) -> QueueReport {
    let noop: ProgressCallback = Arc::new(NoopProgressCallback);
    let progress = base.progress_callback.clone().unwrap_or(noop);
    let total = items.len();
    let mut report = QueueReport::default();

    for (idx, item) in items.iter_mut().enumerate() {
        if queue.is_stopped() {
            report.stopped = true;
            break;
        }
        if !item.state.is_runnable() {
            continue;
        }
        // a skip only ever targets the item it was requested during
        queue.take_skip();

        let folder = item.output_folder(default_folder);
        progress.on_status(&format!("[{}/{}] {}...", idx + 1, total, item.display_name()));
        info!("Queue item {}/{}: {}", idx + 1, total, item.url);

        let config = match item.download_config(base) {
            Ok(c) => c,
            Err(e) => {
                fail(item, &e.to_string(), &mut report);
                continue;
            }
        };

        item.state = ItemState::InProgress;
        item.last_message = None;

        let url = item.url.clone();
        let result = {
            let walk = download_chapters(&mut *session, queue.download(), &url, &folder, &config);
            tokio::pin!(walk);
            // the walk is polled first so its controller reset precedes any stop
            tokio::select! {
                biased;
                r = &mut walk => r,
                _ = queue.interrupted() => {
                    queue.download().stop();
                    walk.await
                }
            }
        };

        let summary = match result {
            Ok(s) => s,
            Err(e) => {
                fail(item, &e.to_string(), &mut report);
                continue;
            }
        };

        let skipped = queue.take_skip();
        if !skipped && queue.is_stopped() {
            // interrupted mid-walk; a later run picks the item up again
            item.state = ItemState::Pending;
            report.stopped = true;
            break;
        }

        if let Some(merge) = &item.merge_after {
            if let Err(message) = merge_after_walk(&folder, merge, Arc::clone(&progress)).await {
                item.last_message = Some(message);
            }
        }

        if skipped || summary.stop_reason == StopReason::Stopped {
            item.state = ItemState::Skipped;
            report.skipped += 1;
            progress.on_status(&format!("Item {:02} - {}: skipped", idx + 1, item.display_name()));
        } else {
            item.state = ItemState::Completed;
            report.completed += 1;
            progress.on_status(&format!(
                "Item {:02} - {}: download complete",
                idx + 1,
                item.display_name()
            ));
        }
    }

    info!(
        "Queue finished: {} completed, {} skipped, {} failed",
        report.completed, report.skipped, report.failed
    );
    report
}

fn fail(item: &mut QueueItem, message: &str, report: &mut QueueReport) {
    warn!("Queue item '{}' failed: {message}", item.url);
    item.state = ItemState::Failed;
    item.last_message = Some(message.to_string());
    report.failed += 1;
}

async fn merge_after_walk(
    folder: &Path,
    merge: &MergeAfter,
    progress: ProgressCallback,
) -> Result<(), String> {
    progress.on_status("Starting PDF merge...");
    let source = if merge.only_new {
        MergeSource::SessionManifest
    } else {
        MergeSource::FolderScan
    };
    let config = MergeConfig::new(merge.chapters_per_bundle)
        .source(source)
        .ignore_merged(true);

    let report = merge_chapter_pdfs_async(folder.to_path_buf(), config, Arc::clone(&progress))
        .await
        .map_err(|e| {
            warn!("Merge after walk failed: {e}");
            progress.on_status(&format!("Merge error: {e}"));
            e.to_string()
        })?;
    info!("Merged {} bundle(s) in '{}'", report.merged_count(), folder.display());

    if merge.delete_originals {
        let originals = folder.join(ORIGINALS_DIR);
        if let Err(e) = tokio::fs::remove_dir_all(&originals).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove '{}': {e}", originals.display());
            }
        }
    }
    if merge.only_new {
        if let Err(e) = manifest::cleanup(folder) {
            warn!("Manifest cleanup failed: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;
    use crate::pipeline::testing::StaticPage;
    use tempfile::TempDir;

    #[test]
    fn item_json_defaults() {
        let items: Vec<QueueItem> =
            serde_json::from_str(r#"[{"url": "https://example.com/c/1"}]"#).unwrap();
        let item = &items[0];
        assert_eq!(item.mode, QueueMode::Auto);
        assert_eq!(item.state, ItemState::Pending);
        assert!(item.merge_after.is_none());
        assert_eq!(item.display_name(), "https://example.com/c/1");
    }

    #[test]
    fn merge_after_defaults_to_three() {
        let item: QueueItem = serde_json::from_str(
            r#"{"url": "u", "title": "T", "mode": "manual", "max_chapters": 4, "merge_after": {"only_new": true}}"#,
        )
        .unwrap();
        let merge = item.merge_after.as_ref().unwrap();
        assert_eq!(merge.chapters_per_bundle, 3);
        assert!(merge.only_new);
        assert_eq!(item.walk_mode(), WalkMode::Manual { max_chapters: 4 });

        let config = item.download_config(&DownloadConfig::default()).unwrap();
        assert!(config.keep_manifest);
        assert_eq!(config.manga_title, "T");
    }

    #[test]
    fn manual_item_without_count_is_rejected() {
        let mut item = QueueItem::new("u");
        item.mode = QueueMode::Manual;
        assert!(item.download_config(&DownloadConfig::default()).is_err());
    }

    #[test]
    fn save_and_load_keep_states() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        let mut item = QueueItem::new("https://example.com/c/1");
        item.state = ItemState::Completed;
        save_queue(&path, &[item.clone()]).unwrap();
        assert_eq!(load_queue(&path).unwrap(), vec![item]);
    }

    #[test]
    fn skip_is_consumed_but_stop_sticks() {
        let q = QueueController::new();
        q.skip_current();
        assert!(q.take_skip());
        assert!(!q.take_skip());
        q.stop_all();
        q.skip_current();
        assert!(!q.take_skip());
        assert!(q.is_stopped());
    }

    #[tokio::test]
    async fn completed_items_are_not_rerun_and_bad_items_fail() {
        let dir = TempDir::new().unwrap();
        let mut page = StaticPage::new("https://example.com/c/1", "<p>nothing</p>");
        let base = DownloadConfig::builder().timing(Timing::immediate()).build().unwrap();

        let mut done = QueueItem::new("https://example.com/done");
        done.state = ItemState::Completed;
        let mut bad = QueueItem::new("https://example.com/bad");
        bad.mode = QueueMode::Manual;

        let mut items = vec![done, bad];
        let report =
            run_queue(&mut page, &QueueController::new(), &mut items, dir.path(), &base).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 0);
        assert_eq!(items[0].state, ItemState::Completed);
        assert_eq!(items[1].state, ItemState::Failed);
        assert!(items[1].last_message.is_some());
    }

    #[tokio::test]
    async fn stop_before_run_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut page = StaticPage::new("https://example.com/c/1", "<p>nothing</p>");
        let q = QueueController::new();
        q.stop_all();
        let mut items = vec![QueueItem::new("https://example.com/c/1")];
        let report = run_queue(&mut page, &q, &mut items, dir.path(), &DownloadConfig::default())
            .await;
        assert!(report.stopped);
        assert_eq!(items[0].state, ItemState::Pending);
    }
}
