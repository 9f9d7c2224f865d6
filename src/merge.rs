//! Bundle merger: regroup chapter PDFs into `Chapter_{min}-{max} - T.pdf`.
//!
//! The bound parsed from each filename is the only ordering key. Members of
//! a written bundle move to `_originals/`, so a second run never merges
//! the same chapter twice.

use crate::chapter::{
    bundle_file_name, is_already_merged, parse_bounds, title_from_file_name, Bounds, ChapterToken,
};
use crate::config::{MergeConfig, MergeSource};
use crate::error::MergeError;
use crate::manifest;
use crate::pipeline::document::save_atomically;
use crate::progress::{DownloadProgressCallback, ProgressCallback};
use lopdf::{dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Folder that receives the members of written bundles.
pub const ORIGINALS_DIR: &str = "_originals";

/// Title used when a member's name carries none.
pub const DEFAULT_TITLE: &str = "Webtoon";

const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

/// One written bundle.
#[derive(Debug, Clone, Serialize)]
pub struct MergedBundle {
    pub path: PathBuf,
    pub members: usize,
    pub pages: usize,
}

/// What a merge run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub bundles: Vec<MergedBundle>,
    /// Chunks with a single usable member, left in place.
    pub untouched: Vec<PathBuf>,
    /// Inputs whose names carry no chapter bound.
    pub skipped: Vec<PathBuf>,
}

impl MergeReport {
    pub fn merged_count(&self) -> usize {
        self.bundles.len()
    }
}

/// Merge on the blocking pool.
pub async fn merge_chapter_pdfs_async(
    folder: PathBuf,
    config: MergeConfig,
    progress: ProgressCallback,
) -> Result<MergeReport, MergeError> {
    tokio::task::spawn_blocking(move || merge_chapter_pdfs(&folder, &config, progress.as_ref()))
        .await
        .map_err(|e| MergeError::Join(e.to_string()))?
}

/// Merge the chapter documents of `folder` into bundles of
/// `config.chapters_per_bundle`.
///
/// # Errors
/// `FolderNotFound` and `InvalidBundleSize` before anything is touched; a
/// PDF or file error aborts the run at the failing bundle.
pub fn merge_chapter_pdfs(
    folder: &Path,
    config: &MergeConfig,
    progress: &dyn DownloadProgressCallback,
) -> Result<MergeReport, MergeError> {
    if !folder.is_dir() {
        progress.on_status("Error: folder not found!");
        return Err(MergeError::FolderNotFound {
            path: folder.to_path_buf(),
        });
    }
    let size = config.chapters_per_bundle;
    if size == 0 {
        return Err(MergeError::InvalidBundleSize);
    }

    let mut report = MergeReport::default();
    let sources: Vec<PathBuf> = match &config.source {
        MergeSource::Files(files) => {
            let picked: Vec<PathBuf> = files
                .iter()
                .filter(|p| is_candidate(p, config.ignore_merged))
                .cloned()
                .collect();
            progress.on_status(&format!("{} selected chapter PDFs taken over.", picked.len()));
            picked
        }
        MergeSource::SessionManifest => match manifest::load_latest_pdfs(folder) {
            Ok(pdfs) => {
                progress.on_status(&format!("{} chapter PDFs from the session manifest.", pdfs.len()));
                pdfs
            }
            Err(e) => {
                debug!("No session manifest to merge from: {e}");
                progress.on_status(
                    "No new chapters in this session (manifest empty or missing).",
                );
                return Ok(report);
            }
        },
        MergeSource::FolderScan => {
            progress.on_status("Searching for PDF files...");
            scan_folder(folder, config.ignore_merged)?
        }
    };

    if sources.is_empty() {
        progress.on_status("No matching chapter PDFs found.");
        return Ok(report);
    }
    progress.on_status(&format!(
        "{} chapter PDFs found. Starting merge...",
        sources.len()
    ));

    let originals = folder.join(ORIGINALS_DIR);
    std::fs::create_dir_all(&originals).map_err(|source| MergeError::Io {
        path: originals.clone(),
        source,
    })?;

    let chunks = sources.chunks(size);
    let chunk_count = chunks.len();
    for (n, chunk) in chunks.enumerate() {
        let mut members: Vec<(&PathBuf, Bounds)> = Vec::new();
        for path in chunk {
            match parse_bounds(&file_name(path)) {
                Some(bounds) => members.push((path, bounds)),
                None => report.skipped.push(path.clone()),
            }
        }
        if members.is_empty() {
            continue;
        }
        if members.len() == 1 {
            progress.on_status(&format!("Single PDF left as is: {}", file_name(members[0].0)));
            report.untouched.push(members[0].0.clone());
            continue;
        }

        let title = chunk
            .first()
            .and_then(|p| title_from_file_name(&file_name(p)))
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let (min, max) = span(&members);
        let out_name = bundle_file_name(min, max, &title);
        let out_path = folder.join(&out_name);
        progress.on_status(&format!("Processing: {out_name}"));

        let paths: Vec<PathBuf> = members.iter().map(|(p, _)| (*p).clone()).collect();
        let pages = merge_documents(&paths, &out_path)?;
        info!("Bundle '{out_name}': {} members, {pages} pages", paths.len());

        for path in &paths {
            if *path == out_path {
                // replaced in place by the bundle itself
                continue;
            }
            move_file(path, &originals.join(file_name(path)))?;
        }
        report.bundles.push(MergedBundle {
            path: out_path,
            members: paths.len(),
            pages,
        });
        progress.on_progress((((n + 1) * 100) / chunk_count).min(100) as u8);
    }

    progress.on_status(&format!(
        "Done! {} PDF(s) created successfully.",
        report.merged_count()
    ));
    Ok(report)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_pdf_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".pdf")
}

fn is_candidate(path: &Path, ignore_merged: bool) -> bool {
    let name = file_name(path);
    is_pdf_name(&name)
        && !(ignore_merged && is_already_merged(&name))
        && parse_bounds(&name).is_some()
}

/// Chapter documents in `folder`, sorted by start bound.
fn scan_folder(folder: &Path, ignore_merged: bool) -> Result<Vec<PathBuf>, MergeError> {
    let entries = std::fs::read_dir(folder).map_err(|source| MergeError::Io {
        path: folder.to_path_buf(),
        source,
    })?;
    let mut found: Vec<(ChapterToken, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_candidate(&path, ignore_merged) {
            continue;
        }
        if let Some(bounds) = parse_bounds(&file_name(&path)) {
            found.push((bounds.start, path));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn span<'a>(members: &'a [(&PathBuf, Bounds)]) -> (&'a ChapterToken, &'a ChapterToken) {
    let mut min = members[0].1.min();
    let mut max = members[0].1.max();
    for (_, b) in &members[1..] {
        min = min.min(b.min());
        max = max.max(b.max());
    }
    (min, max)
}

/// Concatenate the pages of `paths` in order into `out`. Returns the page count.
fn merge_documents(paths: &[PathBuf], out: &Path) -> Result<usize, MergeError> {
    let pdf_err = |path: &Path, detail: String| MergeError::Pdf {
        path: path.to_path_buf(),
        detail,
    };

    let mut merged = Document::with_version("1.5");
    let pages_id = merged.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for path in paths {
        let src = Document::load(path).map_err(|e| pdf_err(path, e.to_string()))?;
        if src.is_encrypted() {
            return Err(pdf_err(path, "document is encrypted".into()));
        }
        for page_id in import_document_objects(&mut merged, src) {
            inherit_page_attributes(&mut merged, page_id);
            if let Ok(page) = merged.get_dictionary_mut(page_id) {
                page.set("Parent", pages_id);
            }
            kids.push(Object::Reference(page_id));
        }
    }

    let page_count = kids.len();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.prune_objects();
    merged.renumber_objects();
    merged.compress();
    save_atomically(&mut merged, out).map_err(|source| MergeError::Io {
        path: out.to_path_buf(),
        source,
    })?;
    Ok(page_count)
}

/// Move every object of `src` into `dst` under fresh ids; returns the
/// source's page ids in page order.
fn import_document_objects(dst: &mut Document, mut src: Document) -> Vec<ObjectId> {
    src.renumber_objects_with(dst.max_id + 1);
    let page_ids: Vec<ObjectId> = src.get_pages().values().copied().collect();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    page_ids
}

/// Copy attributes a page inherits from its page-tree ancestors onto the
/// page, since the page is about to get a new parent.
fn inherit_page_attributes(doc: &mut Document, page_id: ObjectId) {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return;
    };
    let mut missing: Vec<&[u8]> = INHERITABLE_KEYS
        .iter()
        .copied()
        .filter(|k| !page.has(k))
        .collect();
    let mut inherited: Vec<(Vec<u8>, Object)> = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;

    while let Some(id) = parent {
        if missing.is_empty() || depth > 32 {
            break;
        }
        let Ok(node) = doc.get_dictionary(id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                inherited.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    if let Ok(page) = doc.get_dictionary_mut(page_id) {
        for (key, value) in inherited {
            page.set(key, value);
        }
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), MergeError> {
    let io_err = |source: std::io::Error| MergeError::Io {
        path: from.to_path_buf(),
        source,
    };
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    warn!("Rename of '{}' failed, copying instead", from.display());
    std::fs::copy(from, to).map_err(io_err)?;
    std::fs::remove_file(from).map_err(io_err)?;
    Ok(())
}
