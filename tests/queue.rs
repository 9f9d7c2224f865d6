mod common;

use common::*;
use mangapdf::manifest::{MANIFEST_DIR, POINTER_FILE};
use mangapdf::merge::ORIGINALS_DIR;
use mangapdf::queue::{MergeAfter, QueueMode};
use mangapdf::{
    run_queue, DownloadProgressCallback, ItemState, QueueController, QueueItem, WalkMode,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn manual_item(url: String, title: &str, folder: &Path, max_chapters: usize) -> QueueItem {
    QueueItem {
        title: title.to_string(),
        folder: folder.to_path_buf(),
        mode: QueueMode::Manual,
        max_chapters,
        ..QueueItem::new(url)
    }
}

#[tokio::test]
async fn items_run_in_order_and_merge_only_new_chapters() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let mut site = FakeSite::series(4, 1);

    let mut first = manual_item(chapter_url(1), "Alpha", &a, 2);
    first.merge_after = Some(MergeAfter {
        chapters_per_bundle: 2,
        only_new: true,
        delete_originals: true,
    });
    let mut second = QueueItem::new(chapter_url(3));
    second.title = "Beta".into();
    second.folder = b.clone();

    let mut items = vec![first, second];
    let recorder = Arc::new(Recorder::default());
    let base = config(WalkMode::Auto, Some(recorder.clone()));
    let report = run_queue(&mut site, &QueueController::new(), &mut items, dir.path(), &base).await;

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);
    assert!(!report.stopped);
    assert!(items.iter().all(|i| i.state == ItemState::Completed));
    assert!(recorder.saw_status("[1/2] Alpha"));
    assert!(recorder.saw_status("[2/2] Beta"));

    // merged, originals deleted, manifest artifacts removed
    assert_eq!(file_names(&a), vec!["Chapter_001-002 - Alpha.pdf"]);
    assert!(!a.join(ORIGINALS_DIR).exists());
    assert!(!a.join(MANIFEST_DIR).exists());
    assert!(!a.join(POINTER_FILE).exists());

    // auto item walked 3 → 4 and stopped at the last page
    assert_eq!(
        file_names(&b),
        vec!["Chapter_003 - Beta.pdf", "Chapter_004 - Beta.pdf"]
    );
}

#[tokio::test]
async fn item_without_folder_uses_the_default() {
    let dir = TempDir::new().unwrap();
    let mut site = FakeSite::series(1, 1);
    let mut items = vec![QueueItem::new(chapter_url(1))];
    let base = config(WalkMode::Auto, None);

    run_queue(&mut site, &QueueController::new(), &mut items, dir.path(), &base).await;

    assert_eq!(items[0].state, ItemState::Completed);
    // untitled items fall back to the shared title
    assert_eq!(file_names(dir.path()), vec!["Chapter_001 - Demo.pdf"]);
}

/// Skips the running item once, on its first finished chapter.
struct SkipOnce {
    queue: QueueController,
    fired: AtomicBool,
}

impl DownloadProgressCallback for SkipOnce {
    fn on_chapter_complete(&self, _label: &str, _pdf_path: &Path, _images: usize) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.queue.skip_current();
        }
    }
}

#[tokio::test]
async fn skip_ends_only_the_current_item() {
    let dir = TempDir::new().unwrap();
    let mut site = FakeSite::series(5, 1);
    let queue = QueueController::new();
    let mut base = config(WalkMode::Auto, None);
    base.progress_callback = Some(Arc::new(SkipOnce {
        queue: queue.clone(),
        fired: AtomicBool::new(false),
    }));

    let mut items = vec![
        manual_item(chapter_url(1), "One", &dir.path().join("one"), 3),
        manual_item(chapter_url(4), "Two", &dir.path().join("two"), 2),
    ];
    let report = run_queue(&mut site, &queue, &mut items, dir.path(), &base).await;

    assert_eq!(items[0].state, ItemState::Skipped);
    assert_eq!(items[1].state, ItemState::Completed);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(file_names(&dir.path().join("one")), vec!["Chapter_001 - One.pdf"]);
    assert_eq!(file_names(&dir.path().join("two")).len(), 2);
}

/// Stops the whole queue on the first finished chapter.
struct StopQueue {
    queue: QueueController,
}

impl DownloadProgressCallback for StopQueue {
    fn on_chapter_complete(&self, _label: &str, _pdf_path: &Path, _images: usize) {
        self.queue.stop_all();
    }
}

#[tokio::test]
async fn stop_leaves_the_interrupted_item_pending() {
    let dir = TempDir::new().unwrap();
    let mut site = FakeSite::series(3, 1);
    let queue = QueueController::new();
    let mut base = config(WalkMode::Auto, None);
    base.progress_callback = Some(Arc::new(StopQueue {
        queue: queue.clone(),
    }));

    let mut items = vec![
        QueueItem::new(chapter_url(1)),
        QueueItem::new(chapter_url(2)),
    ];
    let report = run_queue(&mut site, &queue, &mut items, dir.path(), &base).await;

    assert!(report.stopped);
    assert_eq!(report.completed, 0);
    assert_eq!(items[0].state, ItemState::Pending);
    assert_eq!(items[1].state, ItemState::Pending);
}

/// Requests a skip while the first item is being announced.
struct SkipDuringFirstItem {
    queue: QueueController,
}

impl DownloadProgressCallback for SkipDuringFirstItem {
    fn on_status(&self, message: &str) {
        if message.starts_with("[1/2]") {
            self.queue.skip_current();
        }
    }
}

#[tokio::test]
async fn skip_on_a_rejected_item_does_not_carry_over() {
    let dir = TempDir::new().unwrap();
    let mut site = FakeSite::series(1, 1);
    let queue = QueueController::new();
    let mut base = config(WalkMode::Auto, None);
    base.progress_callback = Some(Arc::new(SkipDuringFirstItem {
        queue: queue.clone(),
    }));

    let mut items = vec![
        // manual without a chapter count fails validation
        manual_item(chapter_url(1), "Bad", &dir.path().join("bad"), 0),
        QueueItem::new(chapter_url(1)),
    ];
    let report = run_queue(&mut site, &queue, &mut items, dir.path(), &base).await;

    assert_eq!(items[0].state, ItemState::Failed);
    assert_eq!(items[1].state, ItemState::Completed);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.skipped, 0);
}
