//! Session controller: run state, pause accounting and running totals.
//!
//! A [`DownloadController`] is a cheap `Clone` handle. The walker holds one
//! clone and checks it at every loop boundary; the caller holds another and
//! flips pause/stop from its own task or thread (a Ctrl-C handler, a queue
//! runner, a UI).
//!
//! ```text
//! Idle ──start──▶ Running ──pause──▶ Paused
//!                   │  ▲──resume───────┘ │
//!                   │                    │
//!                 stop/complete        stop
//!                   ▼                    ▼
//!          Stopped | Completed        Stopped
//! ```
//!
//! Run-state changes are published on a `tokio::sync::watch` channel so
//! waiters wake on the transition instead of polling. Counters and timing
//! sit behind a `std::sync::Mutex`; no lock is held across an `.await`.

use crate::progress::SessionStats;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Lifecycle of a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

#[derive(Debug, Default)]
struct Totals {
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
    images_total: usize,
    chapters_done: usize,
    /// Running average, recomputed after every completed chapter.
    secs_per_chapter: Option<f64>,
    detected_total: usize,
    detected_chapters: Vec<f64>,
    display_index: usize,
    manifest_path: Option<PathBuf>,
}

impl Totals {
    fn running_elapsed(&self, now: Instant) -> Duration {
        let Some(started) = self.started_at else {
            return Duration::ZERO;
        };
        let open_pause = self
            .paused_at
            .map(|p| now.saturating_duration_since(p))
            .unwrap_or_default();
        now.saturating_duration_since(started)
            .saturating_sub(self.paused_total)
            .saturating_sub(open_pause)
    }

    fn close_pause(&mut self, now: Instant) {
        if let Some(p) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(p);
        }
    }
}

struct Shared {
    totals: Mutex<Totals>,
    state: watch::Sender<RunState>,
}

/// Handle to the state of one download session.
#[derive(Clone)]
pub struct DownloadController {
    shared: Arc<Shared>,
}

impl Default for DownloadController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DownloadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DownloadController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            shared: Arc::new(Shared {
                totals: Mutex::new(Totals::default()),
                state,
            }),
        }
    }

    fn totals(&self) -> MutexGuard<'_, Totals> {
        self.shared
            .totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Run state ────────────────────────────────────────────────────────

    pub fn state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    /// Clear every counter and return to `Idle`.
    pub fn reset(&self) {
        let mut totals = self.totals();
        *totals = Totals::default();
        self.shared.state.send_replace(RunState::Idle);
    }

    /// Enter `Running` and start the session clock.
    pub fn start(&self) {
        let mut totals = self.totals();
        totals.started_at = Some(Instant::now());
        totals.paused_at = None;
        totals.paused_total = Duration::ZERO;
        self.shared.state.send_replace(RunState::Running);
        debug!("Session started");
    }

    /// `Running → Paused`. Returns `false` from any other state.
    pub fn pause(&self) -> bool {
        let mut totals = self.totals();
        let changed = self.shared.state.send_if_modified(|s| {
            if *s == RunState::Running {
                *s = RunState::Paused;
                true
            } else {
                false
            }
        });
        if changed {
            totals.paused_at = Some(Instant::now());
            debug!("Session paused");
        }
        changed
    }

    /// `Paused → Running`, folding the pause into the paused total.
    pub fn resume(&self) -> bool {
        let mut totals = self.totals();
        let changed = self.shared.state.send_if_modified(|s| {
            if *s == RunState::Paused {
                *s = RunState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            totals.close_pause(Instant::now());
            debug!("Session resumed");
        }
        changed
    }

    /// Request a cooperative stop. Ends an open pause.
    pub fn stop(&self) {
        let mut totals = self.totals();
        totals.close_pause(Instant::now());
        let changed = self.shared.state.send_if_modified(|s| {
            if *s == RunState::Completed || *s == RunState::Stopped {
                false
            } else {
                *s = RunState::Stopped;
                true
            }
        });
        if changed {
            debug!("Stop requested");
        }
    }

    /// Mark a session that ran out of work as `Completed`. A stopped
    /// session stays stopped.
    pub fn complete(&self) {
        let mut totals = self.totals();
        totals.close_pause(Instant::now());
        self.shared.state.send_if_modified(|s| {
            if matches!(*s, RunState::Running | RunState::Paused) {
                *s = RunState::Completed;
                true
            } else {
                false
            }
        });
    }

    /// Block while the session is paused. Returns `false` when the session
    /// was stopped (before or during the wait).
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.shared.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                RunState::Paused => {}
                RunState::Stopped => return false,
                _ => return true,
            }
            if rx.changed().await.is_err() {
                return !self.is_stopped();
            }
        }
    }

    /// Resolves once the session is stopped.
    pub async fn stopped(&self) {
        let mut rx = self.shared.state.subscribe();
        loop {
            if *rx.borrow_and_update() == RunState::Stopped {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration`, then hold while paused. Returns `false` as soon
    /// as a stop is observed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        if !duration.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = self.stopped() => return false,
            }
        }
        self.wait_while_paused().await
    }

    // ── Counters ─────────────────────────────────────────────────────────

    /// Session time excluding paused intervals.
    pub fn running_elapsed(&self) -> Duration {
        self.totals().running_elapsed(Instant::now())
    }

    pub fn add_images(&self, n: usize) {
        self.totals().images_total += n;
    }

    pub fn images_total(&self) -> usize {
        self.totals().images_total
    }

    /// Count a completed chapter and refresh the seconds-per-chapter average.
    pub fn record_chapter(&self) {
        let mut totals = self.totals();
        totals.chapters_done += 1;
        let elapsed = totals.running_elapsed(Instant::now()).as_secs_f64();
        totals.secs_per_chapter = Some(elapsed / totals.chapters_done as f64);
    }

    pub fn chapters_done(&self) -> usize {
        self.totals().chapters_done
    }

    pub fn secs_per_chapter(&self) -> Option<f64> {
        self.totals().secs_per_chapter
    }

    // ── Detection metadata ───────────────────────────────────────────────

    pub fn set_detected(&self, total: usize, chapters: Vec<f64>) {
        let mut totals = self.totals();
        totals.detected_total = total;
        totals.detected_chapters = chapters;
    }

    pub fn detected_total(&self) -> usize {
        self.totals().detected_total
    }

    pub fn detected_chapters(&self) -> Vec<f64> {
        self.totals().detected_chapters.clone()
    }

    pub fn display_index(&self) -> usize {
        self.totals().display_index
    }

    pub fn set_display_index(&self, index: usize) {
        self.totals().display_index = index;
    }

    pub fn advance_display_index(&self) {
        self.totals().display_index += 1;
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.totals().manifest_path.clone()
    }

    pub fn set_manifest_path(&self, path: Option<PathBuf>) {
        self.totals().manifest_path = path;
    }

    /// Compute statistics against `chapters_total` (0 when unknown).
    pub fn stats(&self, chapters_total: usize) -> SessionStats {
        let totals = self.totals();
        let done = totals.chapters_done;
        let elapsed = totals.running_elapsed(Instant::now()).as_secs_f64();

        let avg_images_per_chapter = if done > 0 {
            totals.images_total as f64 / done as f64
        } else {
            0.0
        };
        let chapters_per_minute = if elapsed > 0.0 {
            done as f64 / (elapsed / 60.0)
        } else {
            0.0
        };

        let remaining = chapters_total.saturating_sub(done);
        let eta_seconds = if chapters_total == 0 || remaining == 0 {
            0
        } else if let Some(est) = totals.secs_per_chapter.filter(|e| *e > 0.0) {
            (remaining as f64 * est).round() as u64
        } else if chapters_per_minute > 0.0 {
            (remaining as f64 / chapters_per_minute * 60.0).round() as u64
        } else {
            0
        };

        SessionStats {
            chapters_done: done,
            chapters_total,
            images_total: totals.images_total,
            avg_images_per_chapter,
            chapters_per_minute,
            eta_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_only_from_running() {
        let c = DownloadController::new();
        assert!(!c.pause());
        c.start();
        assert!(c.pause());
        assert!(!c.pause());
        assert!(c.resume());
        assert!(!c.resume());
        assert_eq!(c.state(), RunState::Running);
    }

    #[test]
    fn stop_is_terminal_until_reset() {
        let c = DownloadController::new();
        c.start();
        c.stop();
        assert!(c.is_stopped());
        assert!(!c.pause());
        c.complete();
        assert_eq!(c.state(), RunState::Stopped);
        c.reset();
        assert_eq!(c.state(), RunState::Idle);
    }

    #[test]
    fn reset_clears_counters() {
        let c = DownloadController::new();
        c.start();
        c.add_images(12);
        c.record_chapter();
        c.set_detected(4, vec![1.0, 2.0, 2.5, 3.0]);
        c.set_manifest_path(Some(PathBuf::from("m.json")));
        c.reset();
        assert_eq!(c.images_total(), 0);
        assert_eq!(c.chapters_done(), 0);
        assert_eq!(c.detected_total(), 0);
        assert!(c.manifest_path().is_none());
        assert_eq!(c.running_elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_excluded_from_elapsed() {
        let c = DownloadController::new();
        c.start();
        tokio::time::advance(Duration::from_secs(10)).await;
        c.pause();
        tokio::time::advance(Duration::from_secs(30)).await;
        c.resume();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(c.running_elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn open_pause_is_excluded_too() {
        let c = DownloadController::new();
        c.start();
        tokio::time::advance(Duration::from_secs(8)).await;
        c.pause();
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(c.running_elapsed(), Duration::from_secs(8));
        c.stop();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(c.running_elapsed(), Duration::from_secs(9));
    }

    #[tokio::test]
    async fn wait_while_paused_wakes_on_resume() {
        let c = DownloadController::new();
        c.start();
        c.pause();
        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.wait_while_paused().await })
        };
        tokio::task::yield_now().await;
        c.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_while_paused_reports_stop() {
        let c = DownloadController::new();
        c.start();
        c.pause();
        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.wait_while_paused().await })
        };
        tokio::task::yield_now().await;
        c.stop();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn sleep_is_cut_short_by_stop() {
        let c = DownloadController::new();
        c.start();
        let sleeper = {
            let c = c.clone();
            tokio::spawn(async move { c.sleep(Duration::from_secs(3600)).await })
        };
        tokio::task::yield_now().await;
        c.stop();
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn eta_uses_per_chapter_estimate() {
        let c = DownloadController::new();
        c.start();
        tokio::time::advance(Duration::from_secs(60)).await;
        c.add_images(20);
        c.record_chapter();
        tokio::time::advance(Duration::from_secs(60)).await;
        c.add_images(10);
        c.record_chapter();

        let s = c.stats(5);
        assert_eq!(s.chapters_done, 2);
        assert_eq!(s.images_total, 30);
        assert!((s.avg_images_per_chapter - 15.0).abs() < 1e-9);
        assert!((s.chapters_per_minute - 1.0).abs() < 1e-9);
        // 3 remaining × 60 s
        assert_eq!(s.eta_seconds, 180);
    }

    #[test]
    fn eta_is_zero_without_total() {
        let c = DownloadController::new();
        c.start();
        c.record_chapter();
        assert_eq!(c.stats(0).eta_seconds, 0);
    }
}
