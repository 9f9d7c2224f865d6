//! Session manifest: the ledger of chapters one walk produced.
//!
//! ```text
//! <output>/
//!   latest_manifest.txt              ← absolute path of the current manifest
//!   _manifests/session-YYYYMMDD-HHMMSS.json
//! ```
//!
//! An entry is appended only after the chapter's PDF is on disk, so the
//! manifest is the durable answer to "what did this session write", which
//! the merger uses to bundle only new chapters. The walker removes both
//! artifacts at the end of a session unless asked to keep them.

use crate::config::WalkMode;
use crate::error::ManifestError;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MANIFEST_DIR: &str = "_manifests";
pub const POINTER_FILE: &str = "latest_manifest.txt";

/// One completed chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Local time, `YYYY-MM-DDTHH:MM:SS`.
    pub timestamp: String,
    pub chapter_name: String,
    pub pdf_path: PathBuf,
}

/// The manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_start: String,
    pub manga_title: String,
    pub output_folder: PathBuf,
    pub start_url: String,
    pub auto_detect: bool,
    pub max_chapters: usize,
    #[serde(default)]
    pub chapters: Vec<ManifestEntry>,
}

impl SessionManifest {
    pub fn new(manga_title: &str, output_folder: &Path, start_url: &str, mode: WalkMode) -> Self {
        Self {
            session_start: iso_now(),
            manga_title: manga_title.to_string(),
            output_folder: absolute(output_folder),
            start_url: start_url.to_string(),
            auto_detect: mode.is_auto(),
            max_chapters: mode.max_chapters(),
            chapters: Vec::new(),
        }
    }

    /// Write a fresh manifest under `<output>/_manifests/` and point
    /// `latest_manifest.txt` at it. Returns the manifest path.
    pub fn create(&self, output_folder: &Path) -> Result<PathBuf, ManifestError> {
        let dir = output_folder.join(MANIFEST_DIR);
        std::fs::create_dir_all(&dir).map_err(|source| ManifestError::Io {
            path: dir.clone(),
            source,
        })?;

        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut path = dir.join(format!("session-{stamp}.json"));
        let mut n = 2;
        while path.exists() {
            path = dir.join(format!("session-{stamp}-{n}.json"));
            n += 1;
        }
        let path = absolute(&path);

        write_json(&path, self)?;
        let pointer = output_folder.join(POINTER_FILE);
        std::fs::write(&pointer, path.to_string_lossy().as_bytes()).map_err(|source| {
            ManifestError::Io {
                path: pointer.clone(),
                source,
            }
        })?;
        info!("Session manifest: {}", path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Recorded documents that still exist, in the order they were written.
    pub fn existing_pdfs(&self) -> Vec<PathBuf> {
        self.chapters
            .iter()
            .map(|c| c.pdf_path.clone())
            .filter(|p| p.is_file())
            .collect()
    }
}

/// Append one chapter to the manifest at `manifest_path`.
pub fn append_entry(
    manifest_path: &Path,
    chapter_name: &str,
    pdf_path: &Path,
) -> Result<(), ManifestError> {
    let mut manifest = SessionManifest::load(manifest_path)?;
    manifest.chapters.push(ManifestEntry {
        timestamp: iso_now(),
        chapter_name: chapter_name.to_string(),
        pdf_path: absolute(pdf_path),
    });
    write_json(manifest_path, &manifest)?;
    debug!("Manifest += {chapter_name}");
    Ok(())
}

/// Resolve `latest_manifest.txt` in `folder` to a manifest path.
pub fn latest_manifest_path(folder: &Path) -> Result<PathBuf, ManifestError> {
    let pointer = folder.join(POINTER_FILE);
    if !pointer.is_file() {
        return Err(ManifestError::PointerMissing {
            folder: folder.to_path_buf(),
        });
    }
    let target = std::fs::read_to_string(&pointer).map_err(|source| ManifestError::Io {
        path: pointer.clone(),
        source,
    })?;
    let target = PathBuf::from(target.trim());
    if target.as_os_str().is_empty() || !target.is_file() {
        return Err(ManifestError::Dangling { path: target });
    }
    Ok(target)
}

/// Documents recorded by the folder's latest session that still exist.
pub fn load_latest_pdfs(folder: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let path = latest_manifest_path(folder)?;
    let pdfs = SessionManifest::load(&path)?.existing_pdfs();
    if pdfs.is_empty() {
        return Err(ManifestError::Empty { path });
    }
    Ok(pdfs)
}

/// Remove the pointer file and the `_manifests` directory.
pub fn cleanup(folder: &Path) -> Result<(), ManifestError> {
    let pointer = folder.join(POINTER_FILE);
    if pointer.exists() {
        std::fs::remove_file(&pointer).map_err(|source| ManifestError::Io {
            path: pointer.clone(),
            source,
        })?;
    }
    let dir = folder.join(MANIFEST_DIR);
    if dir.is_dir() {
        std::fs::remove_dir_all(&dir).map_err(|source| ManifestError::Io {
            path: dir.clone(),
            source,
        })?;
    }
    debug!("Removed session manifest artifacts in {}", folder.display());
    Ok(())
}

fn write_json(path: &Path, manifest: &SessionManifest) -> Result<(), ManifestError> {
    let io_err = |source: std::io::Error| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let body = serde_json::to_vec_pretty(manifest).map_err(|source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&body).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn iso_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
