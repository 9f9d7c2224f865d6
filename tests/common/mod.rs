//! Shared fixtures: an in-memory chapter site behind `PageSession`.

#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::FutureExt;
use image::{ImageFormat, Rgb, RgbImage};
use mangapdf::page::HtmlDocument;
use mangapdf::{
    DownloadConfig, DownloadProgressCallback, FetchResponse, PageElement, PageSession,
    SessionError, Timing, WalkMode,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SITE: &str = "https://site.test/series/demo";
pub const IMAGES: &str = "https://img.test";

pub fn chapter_url(n: u32) -> String {
    format!("{SITE}-ch-{n}")
}

/// Solid-colour PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Description of one chapter page.
#[derive(Debug, Clone)]
pub struct ChapterFixture {
    pub number: u32,
    pub images: Vec<String>,
    pub next: Option<String>,
    /// Extra markup placed before the reader images.
    pub extra: String,
}

impl ChapterFixture {
    pub fn new(number: u32, image_count: usize) -> Self {
        Self {
            number,
            images: (1..=image_count)
                .map(|i| format!("{IMAGES}/c{number}/{i:03}.png"))
                .collect(),
            next: None,
            extra: String::new(),
        }
    }

    pub fn render(&self) -> String {
        let mut html = format!(
            r#"<html><body>{}<span class="opacity-80">Chapter {}</span>"#,
            self.extra, self.number
        );
        for src in &self.images {
            html.push_str(&format!(r#"<img class="w-full h-full" src="{src}">"#));
        }
        if let Some(next) = &self.next {
            html.push_str(&format!(
                r#"<a class="btn btn-sm btn-outline btn-primary" href="{next}">Next Chapter</a>"#
            ));
        }
        html.push_str("</body></html>");
        html
    }
}

/// In-memory site: pages by URL, resources by URL.
#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    resources: HashMap<String, Vec<u8>>,
    current: Option<HtmlDocument>,
    pub navigations: Arc<AtomicUsize>,
    pub fetches: Arc<AtomicUsize>,
}

impl FakeSite {
    /// Chapters `1..=count`, each linking to the next, each with
    /// `images` 60x80 PNGs.
    pub fn series(count: u32, images: usize) -> Self {
        let fixtures = (1..=count)
            .map(|n| {
                let mut fixture = ChapterFixture::new(n, images);
                if n < count {
                    fixture.next = Some(chapter_url(n + 1));
                }
                fixture
            })
            .collect::<Vec<_>>();
        let mut site = Self::default();
        for fixture in &fixtures {
            site.add_chapter(fixture);
        }
        site
    }

    /// Add (or replace) a chapter page and serve its images.
    pub fn add_chapter(&mut self, fixture: &ChapterFixture) {
        self.pages.insert(chapter_url(fixture.number), fixture.render());
        for src in &fixture.images {
            self.resources.insert(src.clone(), png(60, 80));
        }
    }

    pub fn add_page(&mut self, url: &str, html: &str) {
        self.pages.insert(url.to_string(), html.to_string());
    }

    pub fn remove_resource(&mut self, url: &str) {
        self.resources.remove(url);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl PageSession for FakeSite {
    fn navigate<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<(), SessionError>> {
        async move {
            self.navigations.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(url) {
                Some(html) => {
                    self.current = Some(HtmlDocument::new(url, html.clone()));
                    Ok(())
                }
                None => Err(SessionError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
        .boxed()
    }

    fn current_url(&self) -> Option<String> {
        self.current.as_ref().map(|d| d.url().to_string())
    }

    fn query_all(&self, selector: &str) -> Vec<PageElement> {
        self.current
            .as_ref()
            .map(|d| d.select(selector))
            .unwrap_or_default()
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        _headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<FetchResponse, SessionError>> {
        async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(match self.resources.get(url) {
                Some(bytes) => FetchResponse {
                    status: 200,
                    bytes: bytes.clone(),
                },
                None => FetchResponse {
                    status: 404,
                    bytes: Vec::new(),
                },
            })
        }
        .boxed()
    }
}

/// Records every callback event.
#[derive(Default)]
pub struct Recorder {
    pub statuses: Mutex<Vec<String>>,
    pub percents: Mutex<Vec<u8>>,
    pub starts: Mutex<Vec<(usize, usize)>>,
    pub completed: Mutex<Vec<(String, PathBuf)>>,
    pub failed: Mutex<Vec<String>>,
    pub walks: Mutex<Vec<(usize, usize)>>,
}

impl Recorder {
    pub fn saw_status(&self, needle: &str) -> bool {
        self.statuses.lock().unwrap().iter().any(|s| s.contains(needle))
    }
}

impl DownloadProgressCallback for Recorder {
    fn on_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn on_progress(&self, percent: u8) {
        self.percents.lock().unwrap().push(percent);
    }

    fn on_chapter_start(&self, display_index: usize, total: usize, _url: &str) {
        self.starts.lock().unwrap().push((display_index, total));
    }

    fn on_chapter_complete(&self, label: &str, pdf_path: &Path, _images: usize) {
        self.completed
            .lock()
            .unwrap()
            .push((label.to_string(), pdf_path.to_path_buf()));
    }

    fn on_chapter_failed(&self, label: &str, _error: &str) {
        self.failed.lock().unwrap().push(label.to_string());
    }

    fn on_walk_complete(&self, downloaded: usize, failed: usize) {
        self.walks.lock().unwrap().push((downloaded, failed));
    }
}

/// Walk configuration without delays.
pub fn config(mode: WalkMode, recorder: Option<Arc<Recorder>>) -> DownloadConfig {
    let mut builder = DownloadConfig::builder()
        .manga_title("Demo")
        .mode(mode)
        .timing(Timing::immediate());
    if let Some(r) = recorder {
        builder = builder.progress_callback(r);
    }
    builder.build().unwrap()
}

/// Names of the regular files in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn page_count(pdf: &Path) -> usize {
    lopdf::Document::load(pdf).unwrap().get_pages().len()
}
