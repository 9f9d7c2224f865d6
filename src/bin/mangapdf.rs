//! CLI binary for mangapdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DownloadConfig` / `MergeConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mangapdf::queue::{load_queue, save_queue};
use mangapdf::{
    download_chapters, download_single_chapter, format_elapsed, merge_chapter_pdfs_async,
    run_queue, DownloadConfig, DownloadController, DownloadProgressCallback, EncodeSettings,
    HttpPageSession, MergeConfig, MergeSource, ProgressCallback, QueueController, SessionStats,
    WalkMode,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one percentage bar, status lines as the bar
/// message, one log line per finished or failed chapter.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl DownloadProgressCallback for CliProgressCallback {
    fn on_status(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn on_progress(&self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn on_stats(&self, stats: &SessionStats) {
        let total = match stats.chapters_total {
            0 => "?".to_string(),
            n => n.to_string(),
        };
        let eta = format_elapsed(Duration::from_secs(stats.eta_seconds));
        self.bar.set_prefix(format!(
            "{}/{}  {} img  {:.2}/min  ETA {}",
            stats.chapters_done, total, stats.images_total, stats.chapters_per_minute, eta
        ));
    }

    fn on_chapter_complete(&self, label: &str, pdf_path: &Path, images: usize) {
        self.bar.println(format!(
            "  {} {:<16} {}  {}",
            green("✓"),
            label,
            dim(&format!("{images:>3} images")),
            dim(&pdf_path.display().to_string()),
        ));
    }

    fn on_chapter_failed(&self, label: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<16} {}", red("✗"), label, red(&msg)));
    }

    fn on_walk_complete(&self, downloaded: usize, failed: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} chapters downloaded{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&downloaded.to_string()),
            if failed == 0 {
                String::new()
            } else {
                format!("  ({} failed in a row at the end)", red(&failed.to_string()))
            }
        );
    }
}

/// Plain status lines on stderr, for `--no-progress`.
struct LineProgressCallback;

impl DownloadProgressCallback for LineProgressCallback {
    fn on_status(&self, message: &str) {
        eprintln!("{message}");
    }

    fn on_chapter_failed(&self, label: &str, error: &str) {
        eprintln!("{} {label}: {error}", red("✗"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Download 10 chapters starting at chapter 1
  mangapdf download https://example.com/title/some-series-ch-1 -t "Some Series" -n 10

  # Follow next links until the series ends
  mangapdf download https://example.com/title/some-series-ch-1 -t "Some Series" --auto

  # Download, then bundle only the new chapters by 5
  mangapdf download URL -t "Some Series" --auto --merge 5 --only-new

  # One chapter
  mangapdf chapter https://example.com/title/some-series-ch-12 -t "Some Series"

  # Bundle every chapter PDF in a folder by 3
  mangapdf merge downloads/some-series -n 3

  # Run a queue file, writing item states back
  mangapdf queue queue.json --save

SETTINGS FILE (--settings):
  {"jpeg_quality": 75, "progressive": true, "max_width": 1200, "grayscale": false}

ENVIRONMENT VARIABLES:
  MANGAPDF_OUTPUT                Output folder
  MANGAPDF_SETTINGS              Image settings JSON file
  MANGAPDF_WAIT_AFTER_LOAD       Seconds to wait after a page load
  MANGAPDF_DOWNLOAD_DELAY        Seconds between image downloads
  MANGAPDF_CHAPTER_DELAY         Seconds between chapters
  MANGAPDF_MAX_CHAPTERS_LIMIT    Safety cap on chapters per walk
  MANGAPDF_MAX_CHAPTER_FAILURES  Consecutive failures that end a walk
  RUST_LOG                       Log filter (overrides -v / -q)
"#;

/// Download chapter images as PDFs and bundle them by chapter range.
#[derive(Parser, Debug)]
#[command(
    name = "mangapdf",
    version,
    about = "Download chapter images as PDFs and bundle them by chapter range",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Disable progress bar.
    #[arg(long, global = true, env = "MANGAPDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MANGAPDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MANGAPDF_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk chapters from a start URL, one PDF per chapter.
    Download(DownloadArgs),
    /// Download a single chapter.
    Chapter(ChapterArgs),
    /// Bundle chapter PDFs in a folder.
    Merge(MergeArgs),
    /// Run a JSON queue of downloads.
    Queue(QueueArgs),
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// URL of the first chapter.
    url: String,

    #[command(flatten)]
    target: TargetArgs,

    /// Number of chapters to download (manual mode).
    #[arg(short = 'n', long, default_value_t = 1, conflicts_with = "auto")]
    max_chapters: usize,

    /// Follow next links until none is left.
    #[arg(long)]
    auto: bool,

    /// Remove each chapter's image folder once its PDF exists.
    #[arg(long, env = "MANGAPDF_DELETE_IMAGES")]
    delete_images: bool,

    /// Keep the session manifest after the walk.
    #[arg(long)]
    keep_manifest: bool,

    /// Bundle chapters by N once the walk ends.
    #[arg(long, value_name = "N")]
    merge: Option<usize>,

    /// With --merge: bundle only the chapters of this walk.
    #[arg(long, requires = "merge")]
    only_new: bool,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Debug)]
struct ChapterArgs {
    /// URL of the chapter page.
    url: String,

    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Output folder.
    #[arg(short, long, env = "MANGAPDF_OUTPUT", default_value = "downloads")]
    output: PathBuf,

    /// Title used in document names.
    #[arg(short, long, env = "MANGAPDF_TITLE", default_value = "Manga")]
    title: String,
}

#[derive(Args, Debug)]
struct TuningArgs {
    /// Image settings JSON file.
    #[arg(long, env = "MANGAPDF_SETTINGS")]
    settings: Option<PathBuf>,

    /// JPEG quality (1-100); overrides the settings file.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Maximum image width in pixels; overrides the settings file.
    #[arg(long)]
    max_width: Option<u32>,

    /// Store images in grayscale.
    #[arg(long)]
    grayscale: bool,

    /// Seconds to wait after a page load.
    #[arg(long, env = "MANGAPDF_WAIT_AFTER_LOAD", default_value_t = 4.0)]
    wait_after_load: f64,

    /// Seconds between image downloads.
    #[arg(long, env = "MANGAPDF_DOWNLOAD_DELAY", default_value_t = 0.2)]
    download_delay: f64,

    /// Seconds between chapters.
    #[arg(long, env = "MANGAPDF_CHAPTER_DELAY", default_value_t = 2.0)]
    chapter_delay: f64,

    /// Safety cap on chapters per walk.
    #[arg(long, env = "MANGAPDF_MAX_CHAPTERS_LIMIT", default_value_t = 200)]
    max_chapters_limit: usize,

    /// Consecutive chapter failures that end a walk.
    #[arg(long, env = "MANGAPDF_MAX_CHAPTER_FAILURES", default_value_t = 5)]
    max_chapter_failures: usize,

    /// HTTP user agent.
    #[arg(long, env = "MANGAPDF_USER_AGENT")]
    user_agent: Option<String>,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "MANGAPDF_TIMEOUT", default_value_t = 30)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Folder holding the chapter PDFs.
    folder: PathBuf,

    /// Chapters per bundle.
    #[arg(short = 'n', long, default_value_t = 3)]
    per_bundle: usize,

    /// Merge only these files, in this order.
    #[arg(long, num_args = 1.., conflicts_with = "only_new")]
    files: Vec<PathBuf>,

    /// Merge only the chapters of the latest session manifest.
    #[arg(long)]
    only_new: bool,

    /// Also take already merged bundles as input.
    #[arg(long)]
    include_merged: bool,
}

#[derive(Args, Debug)]
struct QueueArgs {
    /// Queue JSON file.
    file: PathBuf,

    /// Folder for items without one.
    #[arg(short, long, env = "MANGAPDF_OUTPUT", default_value = "downloads")]
    output: PathBuf,

    /// Write item states back to the queue file.
    #[arg(long)]
    save: bool,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v asks for them.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn DownloadProgressCallback>)
    } else if !cli.quiet {
        Some(Arc::new(LineProgressCallback) as Arc<dyn DownloadProgressCallback>)
    } else {
        None
    };

    match cli.command {
        Command::Download(args) => run_download(args, progress, cli.quiet).await,
        Command::Chapter(args) => run_chapter(args, progress, cli.quiet).await,
        Command::Merge(args) => run_merge(args, progress, cli.quiet).await,
        Command::Queue(args) => run_queue_file(args, progress, cli.quiet).await,
    }
}

async fn run_download(args: DownloadArgs, progress: Option<ProgressCallback>, quiet: bool) -> Result<()> {
    let mode = if args.auto {
        WalkMode::Auto
    } else {
        WalkMode::Manual {
            max_chapters: args.max_chapters,
        }
    };
    let keep_manifest = args.keep_manifest || args.only_new;
    let config = build_config(&args.tuning, &args.target.title, mode, progress.clone())?;
    let config = DownloadConfig {
        delete_images_after_pdf: args.delete_images,
        keep_manifest,
        ..config
    };

    let mut session = HttpPageSession::from_config(&config).context("Failed to open HTTP session")?;
    let controller = DownloadController::new();
    stop_on_ctrl_c({
        let c = controller.clone();
        move || c.stop()
    });

    let summary = download_chapters(
        &mut session,
        &controller,
        &args.url,
        &args.target.output,
        &config,
    )
    .await
    .context("Download failed")?;

    if !quiet {
        eprintln!(
            "{}  {} chapters  {} images  {}  →  {}",
            if summary.failures.is_empty() { green("✔") } else { cyan("⚠") },
            summary.downloaded,
            summary.images,
            format_elapsed(summary.elapsed),
            bold(&summary.output_folder.display().to_string()),
        );
        eprintln!("   {}", dim(&format!("ended: {:?}", summary.stop_reason)));
        if let Some(log) = &summary.error_log {
            eprintln!("   {}", dim(&format!("error log: {}", log.display())));
        }
    }

    if let Some(per_bundle) = args.merge {
        let source = if args.only_new {
            MergeSource::SessionManifest
        } else {
            MergeSource::FolderScan
        };
        let merge = MergeConfig::new(per_bundle).source(source);
        merge_and_report(&args.target.output, merge, progress, quiet).await?;
        if args.only_new && !args.keep_manifest {
            mangapdf::manifest::cleanup(&args.target.output)
                .context("Failed to remove session manifest")?;
        }
    }
    Ok(())
}

async fn run_chapter(args: ChapterArgs, progress: Option<ProgressCallback>, quiet: bool) -> Result<()> {
    let config = build_config(
        &args.tuning,
        &args.target.title,
        WalkMode::Manual { max_chapters: 1 },
        progress,
    )?;
    let mut session = HttpPageSession::from_config(&config).context("Failed to open HTTP session")?;
    let controller = DownloadController::new();
    stop_on_ctrl_c({
        let c = controller.clone();
        move || c.stop()
    });

    let outcome = download_single_chapter(
        &mut session,
        &controller,
        &args.url,
        &args.target.output,
        &config,
    )
    .await
    .context("Chapter download failed")?;

    if !quiet {
        eprintln!(
            "{}  {}  {} images on {} pages  →  {}",
            green("✔"),
            outcome.label,
            outcome.images_saved,
            outcome.pages,
            bold(&outcome.pdf_path.display().to_string()),
        );
    }
    Ok(())
}

async fn run_merge(args: MergeArgs, progress: Option<ProgressCallback>, quiet: bool) -> Result<()> {
    let source = if !args.files.is_empty() {
        MergeSource::Files(args.files)
    } else if args.only_new {
        MergeSource::SessionManifest
    } else {
        MergeSource::FolderScan
    };
    let config = MergeConfig::new(args.per_bundle)
        .source(source)
        .ignore_merged(!args.include_merged);
    merge_and_report(&args.folder, config, progress, quiet).await
}

async fn run_queue_file(args: QueueArgs, progress: Option<ProgressCallback>, quiet: bool) -> Result<()> {
    let mut items = load_queue(&args.file).context("Failed to load queue")?;
    let base = build_config(&args.tuning, "Manga", WalkMode::Auto, progress)?;
    let mut session = HttpPageSession::from_config(&base).context("Failed to open HTTP session")?;
    let queue = QueueController::new();
    stop_on_ctrl_c({
        let q = queue.clone();
        move || q.stop_all()
    });

    let report = run_queue(&mut session, &queue, &mut items, &args.output, &base).await;

    if args.save {
        save_queue(&args.file, &items).context("Failed to write queue state")?;
    }
    if !quiet {
        eprintln!(
            "{}  {} completed  {} skipped  {} failed{}",
            if report.failed == 0 { green("✔") } else { cyan("⚠") },
            report.completed,
            report.skipped,
            red(&report.failed.to_string()),
            if report.stopped { "  (stopped)" } else { "" },
        );
        for item in items.iter().filter(|i| i.last_message.is_some()) {
            eprintln!(
                "   {} {}: {}",
                red("✗"),
                item.display_name(),
                item.last_message.as_deref().unwrap_or_default()
            );
        }
    }
    Ok(())
}

async fn merge_and_report(
    folder: &Path,
    config: MergeConfig,
    progress: Option<ProgressCallback>,
    quiet: bool,
) -> Result<()> {
    let progress: ProgressCallback =
        progress.unwrap_or_else(|| Arc::new(mangapdf::NoopProgressCallback));
    let report = merge_chapter_pdfs_async(folder.to_path_buf(), config, progress)
        .await
        .context("Merge failed")?;
    if !quiet {
        for bundle in &report.bundles {
            eprintln!(
                "  {} {}  {}",
                green("✓"),
                bundle.path.display(),
                dim(&format!("{} chapters, {} pages", bundle.members, bundle.pages)),
            );
        }
        eprintln!("{} {} bundle(s) written", green("✔"), bold(&report.merged_count().to_string()));
    }
    Ok(())
}

/// Map CLI tuning flags to `DownloadConfig`.
fn build_config(
    tuning: &TuningArgs,
    title: &str,
    mode: WalkMode,
    progress: Option<ProgressCallback>,
) -> Result<DownloadConfig> {
    let mut encode = match &tuning.settings {
        Some(path) => EncodeSettings::load(path),
        None => EncodeSettings::default(),
    };
    if let Some(q) = tuning.quality {
        encode.jpeg_quality = q;
    }
    if let Some(w) = tuning.max_width {
        encode.max_width = w;
    }
    if tuning.grayscale {
        encode.grayscale = true;
    }

    let mut builder = DownloadConfig::builder()
        .manga_title(title)
        .mode(mode)
        .encode(encode)
        .settle_delay(seconds(tuning.wait_after_load))
        .image_delay(seconds(tuning.download_delay))
        .chapter_delay(seconds(tuning.chapter_delay))
        .max_chapters_limit(tuning.max_chapters_limit)
        .max_chapter_failures(tuning.max_chapter_failures)
        .request_timeout_secs(tuning.timeout);
    if let Some(ua) = &tuning.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn seconds(s: f64) -> Duration {
    Duration::try_from_secs_f64(s.max(0.0)).unwrap_or_default()
}

/// Request a cooperative stop on the first Ctrl-C.
fn stop_on_ctrl_c(stop: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", cyan("Stop requested, finishing the current step..."));
            stop();
        }
    });
}
