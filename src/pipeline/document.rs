//! Chapter document assembly: saved images → composite pages → PDF.
//!
//! Each group of images is stacked vertically onto a white canvas as wide as
//! the widest member (left-aligned), encoded as JPEG and embedded as a
//! `DCTDecode` image XObject on a page exactly the canvas size (1 px = 1 pt).
//!
//! Assembly is CPU-bound; [`assemble_document`] runs it on the blocking pool.

use crate::config::EncodeSettings;
use crate::error::DocumentError;
use crate::pipeline::encode::{encode_jpeg, prepare};
use image::{imageops, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Summary of a written document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembledDocument {
    pub pages: usize,
    pub images: usize,
}

/// Build the PDF on the blocking pool.
pub async fn assemble_document(
    image_paths: Vec<PathBuf>,
    pdf_path: PathBuf,
    settings: EncodeSettings,
    images_per_page: usize,
) -> Result<AssembledDocument, DocumentError> {
    tokio::task::spawn_blocking(move || {
        images_to_pdf(&image_paths, &pdf_path, &settings, images_per_page)
    })
    .await
    .map_err(|e| DocumentError::Join(e.to_string()))?
}

/// Build the PDF synchronously. Unreadable images are skipped; a document
/// without a single readable image is an error and nothing is written.
pub fn images_to_pdf(
    image_paths: &[PathBuf],
    pdf_path: &Path,
    settings: &EncodeSettings,
    images_per_page: usize,
) -> Result<AssembledDocument, DocumentError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    let mut placed = 0usize;

    for group in image_paths.chunks(images_per_page.max(1)) {
        let images: Vec<DynamicImage> = group
            .iter()
            .filter_map(|path| match image::open(path) {
                Ok(img) => Some(prepare(img, settings)),
                Err(e) => {
                    debug!("Leaving '{}' out of the document: {e}", path.display());
                    None
                }
            })
            .collect();
        if images.is_empty() {
            continue;
        }
        placed += images.len();

        let page = compose_page(&images, settings.grayscale);
        let (width, height) = (page.width(), page.height());
        let jpeg = encode_jpeg(&page, settings.jpeg_quality)?;
        let color_space = if settings.grayscale {
            "DeviceGray"
        } else {
            "DeviceRGB"
        };

        let image_id = doc.add_object(
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                jpeg,
            )
            .with_compression(false),
        );
        let content = format!("q {width} 0 0 {height} 0 0 cm /Im1 Do Q\n").into_bytes();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
            "MediaBox" => Object::Array(vec![
                0.into(),
                0.into(),
                (width as i64).into(),
                (height as i64).into(),
            ]),
        });
        kids.push(Object::Reference(page_id));
    }

    if kids.is_empty() {
        return Err(DocumentError::NoPages);
    }
    let page_count = kids.len();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    save_atomically(&mut doc, pdf_path).map_err(|source| DocumentError::Write {
        path: pdf_path.to_path_buf(),
        source,
    })?;

    info!(
        "Wrote '{}' ({page_count} page(s), {placed} image(s))",
        pdf_path.display()
    );
    Ok(AssembledDocument {
        pages: page_count,
        images: placed,
    })
}

/// Stack `images` top to bottom on a white canvas.
fn compose_page(images: &[DynamicImage], grayscale: bool) -> DynamicImage {
    let width = images.iter().map(DynamicImage::width).max().unwrap_or(1);
    let height: u32 = images.iter().map(DynamicImage::height).sum();

    if grayscale {
        let mut canvas = GrayImage::from_pixel(width, height, Luma([255]));
        let mut y = 0i64;
        for img in images {
            imageops::replace(&mut canvas, &img.to_luma8(), 0, y);
            y += i64::from(img.height());
        }
        DynamicImage::ImageLuma8(canvas)
    } else {
        let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        let mut y = 0i64;
        for img in images {
            imageops::replace(&mut canvas, &img.to_rgb8(), 0, y);
            y += i64::from(img.height());
        }
        DynamicImage::ImageRgb8(canvas)
    }
}

/// Write `doc` to a temp file next to `path`, then move it into place.
pub(crate) fn save_atomically(doc: &mut Document, path: &Path) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    doc.save_to(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn write_image(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(w, h, Rgb([30, 60, 90])).save(&path).unwrap();
        path
    }

    fn page_sizes(pdf: &Path) -> Vec<(i64, i64)> {
        let doc = Document::load(pdf).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let page = doc.get_object(*id).unwrap().as_dict().unwrap();
                let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
                (mb[2].as_i64().unwrap(), mb[3].as_i64().unwrap())
            })
            .collect()
    }

    #[test]
    fn composite_is_widest_by_summed_height() {
        let a = DynamicImage::ImageRgb8(RgbImage::new(100, 40));
        let b = DynamicImage::ImageRgb8(RgbImage::new(60, 25));
        let page = compose_page(&[a, b], false);
        assert_eq!((page.width(), page.height()), (100, 65));
        // right of the narrower image stays white
        assert_eq!(page.to_rgb8().get_pixel(90, 50), &Rgb([255, 255, 255]));
    }

    #[test]
    fn groups_become_pages_of_composite_size() {
        let dir = TempDir::new().unwrap();
        let paths = vec![
            write_image(dir.path(), "001.jpg", 100, 40),
            write_image(dir.path(), "002.jpg", 80, 50),
            write_image(dir.path(), "003.jpg", 90, 30),
        ];
        let pdf = dir.path().join("Chapter_001 - T.pdf");
        let out = images_to_pdf(&paths, &pdf, &EncodeSettings::default(), 2).unwrap();
        assert_eq!(out, AssembledDocument { pages: 2, images: 3 });
        assert_eq!(page_sizes(&pdf), vec![(100, 90), (90, 30)]);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("001.jpg");
        std::fs::write(&bad, b"not an image").unwrap();
        let good = write_image(dir.path(), "002.jpg", 10, 10);
        let pdf = dir.path().join("out.pdf");
        let out = images_to_pdf(&[bad, good], &pdf, &EncodeSettings::default(), 10).unwrap();
        assert_eq!(out.images, 1);
    }

    #[test]
    fn nothing_readable_is_an_error() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("001.jpg");
        std::fs::write(&bad, b"nope").unwrap();
        let pdf = dir.path().join("out.pdf");
        let err = images_to_pdf(&[bad], &pdf, &EncodeSettings::default(), 10).unwrap_err();
        assert!(matches!(err, DocumentError::NoPages));
        assert!(!pdf.exists());
    }

    #[tokio::test]
    async fn assemble_runs_off_the_runtime() {
        let dir = TempDir::new().unwrap();
        let paths = vec![write_image(dir.path(), "001.jpg", 20, 20)];
        let pdf = dir.path().join("x.pdf");
        let out = assemble_document(paths, pdf.clone(), EncodeSettings::default(), 10)
            .await
            .unwrap();
        assert_eq!(out.pages, 1);
        assert!(pdf.exists());
    }
}
