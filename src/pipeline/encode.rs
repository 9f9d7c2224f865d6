//! Image normalisation and JPEG re-encoding.
//!
//! Chapter hosts serve PNG, WebP, GIF and JPEG with and without alpha. Every
//! image is normalised to 8-bit RGB (alpha flattened onto white) or 8-bit
//! grayscale, capped at the configured width, and stored as JPEG.

use crate::config::EncodeSettings;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use jpeg_encoder::{ColorType, Encoder};
use std::io::Cursor;
use tracing::debug;

/// Result of re-encoding downloaded bytes.
#[derive(Debug)]
pub enum EncodedImage {
    /// Normalised JPEG.
    Jpeg { bytes: Vec<u8>, width: u32, height: u32 },
    /// The bytes could not be decoded and are kept as served.
    Original(Vec<u8>),
}

impl EncodedImage {
    pub fn bytes(&self) -> &[u8] {
        match self {
            EncodedImage::Jpeg { bytes, .. } => bytes,
            EncodedImage::Original(bytes) => bytes,
        }
    }
}

/// Decode, normalise and JPEG-encode one downloaded image.
///
/// Undecodable input is returned unchanged; an encoder failure is an error.
pub fn reencode(bytes: Vec<u8>, settings: &EncodeSettings) -> Result<EncodedImage, image::ImageError> {
    let img = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            debug!("Keeping undecodable image as served ({} bytes): {e}", bytes.len());
            return Ok(EncodedImage::Original(bytes));
        }
    };
    let img = prepare(img, settings);
    let (width, height) = (img.width(), img.height());
    let bytes = if settings.progressive {
        encode_progressive(&img, settings.jpeg_quality)?
    } else {
        encode_jpeg(&img, settings.jpeg_quality)?
    };
    Ok(EncodedImage::Jpeg { bytes, width, height })
}

/// Colour-normalise and downscale.
pub fn prepare(img: DynamicImage, settings: &EncodeSettings) -> DynamicImage {
    let img = normalize(img, settings.grayscale);
    downscale(img, settings.max_width)
}

fn normalize(img: DynamicImage, grayscale: bool) -> DynamicImage {
    if grayscale {
        return DynamicImage::ImageLuma8(img.to_luma8());
    }
    if img.color().has_alpha() {
        return DynamicImage::ImageRgb8(flatten_on_white(&img));
    }
    match img {
        DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = u32::from(px[3]);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    out
}

/// Shrink to `max_width` keeping the aspect ratio. Never upscales.
fn downscale(img: DynamicImage, max_width: u32) -> DynamicImage {
    if max_width == 0 || img.width() <= max_width {
        return img;
    }
    let ratio = f64::from(max_width) / f64::from(img.width());
    let height = ((f64::from(img.height()) * ratio).round() as u32).max(1);
    img.resize_exact(max_width, height, FilterType::Lanczos3)
}

/// Encode as baseline JPEG at `quality`, retrying with the encoder's
/// default settings if the configured encode is rejected.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    match img.write_with_encoder(encoder) {
        Ok(()) => Ok(buf),
        Err(e) => {
            debug!("JPEG encode at quality {quality} failed ({e}); using defaults");
            let mut fallback = Vec::new();
            img.write_to(&mut Cursor::new(&mut fallback), ImageFormat::Jpeg)?;
            Ok(fallback)
        }
    }
}

/// Encode as progressive JPEG (SOF2). Falls back to [`encode_jpeg`] when the
/// progressive encoder rejects the image, e.g. a side above 65 535 px.
pub fn encode_progressive(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let (Ok(width), Ok(height)) = (u16::try_from(img.width()), u16::try_from(img.height())) else {
        debug!(
            "{}x{} is too large for a progressive scan; encoding baseline",
            img.width(),
            img.height()
        );
        return encode_jpeg(img, quality);
    };
    let (pixels, color) = match img {
        DynamicImage::ImageLuma8(gray) => (gray.as_raw().as_slice(), ColorType::Luma),
        DynamicImage::ImageRgb8(rgb) => (rgb.as_raw().as_slice(), ColorType::Rgb),
        _ => return encode_jpeg(img, quality),
    };

    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf, quality.clamp(1, 100));
    encoder.set_progressive(true);
    match encoder.encode(pixels, width, height, color) {
        Ok(()) => Ok(buf),
        Err(e) => {
            debug!("Progressive JPEG encode failed ({e}); encoding baseline");
            encode_jpeg(img, quality)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn transparent_pixels_become_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let out = normalize(img, false);
        assert_eq!(out.get_pixel(1, 1), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn opaque_pixels_are_kept() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])));
        let out = normalize(img, false);
        assert_eq!(out.get_pixel(0, 0), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn wide_images_are_downscaled_narrow_ones_untouched() {
        let wide = DynamicImage::ImageRgb8(RgbImage::new(2400, 600));
        let out = downscale(wide, 1200);
        assert_eq!((out.width(), out.height()), (1200, 300));

        let narrow = DynamicImage::ImageRgb8(RgbImage::new(800, 600));
        let out = downscale(narrow, 1200);
        assert_eq!((out.width(), out.height()), (800, 600));
    }

    #[test]
    fn reencode_produces_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 20, Rgba([200, 0, 0, 128])));
        let settings = EncodeSettings::default();
        let encoded = reencode(png_bytes(&img), &settings).unwrap();
        match &encoded {
            EncodedImage::Jpeg { width, height, bytes } => {
                assert_eq!((*width, *height), (30, 20));
                assert_eq!(image::guess_format(bytes).unwrap(), ImageFormat::Jpeg);
            }
            EncodedImage::Original(_) => panic!("expected JPEG"),
        }
    }

    fn has_marker(jpeg: &[u8], marker: u8) -> bool {
        jpeg.windows(2).any(|w| w == [0xFF, marker])
    }

    #[test]
    fn progressive_setting_selects_the_frame_type() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(16, 16, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, 90])
        }));
        let progressive = EncodeSettings {
            progressive: true,
            ..EncodeSettings::default()
        };
        let out = reencode(png_bytes(&img), &progressive).unwrap();
        assert!(has_marker(out.bytes(), 0xC2));
        assert!(!has_marker(out.bytes(), 0xC0));
        let decoded = image::load_from_memory(out.bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));

        let baseline = EncodeSettings {
            progressive: false,
            ..EncodeSettings::default()
        };
        let out = reencode(png_bytes(&img), &baseline).unwrap();
        assert!(has_marker(out.bytes(), 0xC0));
        assert!(!has_marker(out.bytes(), 0xC2));
    }

    #[test]
    fn progressive_grayscale_is_single_channel() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 200, 30])));
        let settings = EncodeSettings {
            grayscale: true,
            progressive: true,
            ..EncodeSettings::default()
        };
        let encoded = reencode(png_bytes(&img), &settings).unwrap();
        assert!(has_marker(encoded.bytes(), 0xC2));
        let decoded = image::load_from_memory(encoded.bytes()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn grayscale_output_is_single_channel() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 200, 30])));
        let settings = EncodeSettings {
            grayscale: true,
            ..EncodeSettings::default()
        };
        let encoded = reencode(png_bytes(&img), &settings).unwrap();
        let decoded = image::load_from_memory(encoded.bytes()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn undecodable_bytes_are_kept() {
        let raw = b"definitely not an image".to_vec();
        let encoded = reencode(raw.clone(), &EncodeSettings::default()).unwrap();
        assert!(matches!(encoded, EncodedImage::Original(ref b) if *b == raw));
    }
}
