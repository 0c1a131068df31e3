//! Image encoding: `DynamicImage` → JPEG bytes at an explicit quality.
//!
//! Page images are deliberately encoded far below print quality; the
//! encoder itself is policy-free and takes the quality from the caller.
//! JPEG carries no alpha channel, so renders (pdfium hands back RGBA) are
//! flattened to RGB before encoding.

use crate::error::ConvertError;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Encode `img` as a baseline JPEG. `quality` is clamped to `1..=100`.
///
/// `page` is only used to label errors (1-indexed; 0 for thumbnails).
pub fn encode_jpeg(img: &DynamicImage, quality: u8, page: usize) -> Result<Vec<u8>, ConvertError> {
    let quality = quality.clamp(1, 100);
    let rgb = img.to_rgb8();

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|e| ConvertError::EncodingFailure {
            page,
            detail: e.to_string(),
        })?;

    debug!(
        "Encoded {}x{} → {} bytes JPEG (q={})",
        rgb.width(),
        rgb.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

/// Shrink `img` to fit inside `max_width × max_height`, preserving aspect
/// ratio. Images already inside the box are returned unscaled.
pub fn fit_within(img: &DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if img.width() <= max_width && img.height() <= max_height {
        return img.clone();
    }
    img.thumbnail(max_width, max_height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn textured(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let v = (x * 7 ^ y * 13) as u8;
            Rgb([v, (x * y % 251) as u8, v.wrapping_mul(3)])
        }))
    }

    #[test]
    fn encodes_rgba_as_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 128])));
        let bytes = encode_jpeg(&img, 25, 1).expect("encode should succeed");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");
        let decoded = image::load_from_memory(&bytes).expect("valid JPEG");
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn low_quality_is_smaller_than_high_quality() {
        let img = textured(300, 400);
        let low = encode_jpeg(&img, 25, 1).unwrap();
        let high = encode_jpeg(&img, 100, 1).unwrap();
        assert!(
            low.len() < high.len(),
            "q25 = {} bytes, q100 = {} bytes",
            low.len(),
            high.len()
        );
    }

    #[test]
    fn out_of_range_quality_is_clamped() {
        let img = textured(16, 16);
        assert!(encode_jpeg(&img, 0, 1).is_ok());
        assert!(encode_jpeg(&img, 255, 1).is_ok());
    }

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        let img = textured(900, 1200);
        let thumb = fit_within(&img, 300, 400);
        assert_eq!((thumb.width(), thumb.height()), (300, 400));

        let wide = textured(1000, 200);
        let thumb = fit_within(&wide, 300, 400);
        assert_eq!(thumb.width(), 300);
        assert_eq!(thumb.height(), 60);
    }

    #[test]
    fn fit_within_never_enlarges() {
        let img = textured(120, 80);
        let same = fit_within(&img, 300, 400);
        assert_eq!((same.width(), same.height()), (120, 80));
    }
}
