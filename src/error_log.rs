//! Per-folder plain-text error log (`error_log.txt`).
//!
//! Every skipped image and failed chapter leaves one timestamped line here,
//! so a long unattended walk can be audited afterwards.

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const ERROR_LOG_FILE: &str = "error_log.txt";

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn in_folder(folder: &Path) -> Self {
        Self {
            path: folder.join(ERROR_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Append `[YYYY-MM-DD HH:MM:SS] message`. Best effort: a failed write
    /// is reported through `tracing` and otherwise ignored.
    pub async fn append(&self, message: &str) {
        warn!("{message}");
        let line = format_line(&Local::now().format("%Y-%m-%d %H:%M:%S").to_string(), message);
        if let Err(e) = self.write_line(&line).await {
            warn!("Could not write to '{}': {e}", self.path.display());
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

fn format_line(timestamp: &str, message: &str) -> String {
    format!("[{timestamp}] {message}\n")
}
