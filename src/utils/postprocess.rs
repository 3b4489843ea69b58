use crate::core::error::ContentError;
use crate::core::scene::AspectRatio;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgb, RgbImage};

/// Ratios within this fraction (1%) of the target are left uncropped.
const RATIO_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Decodes `raw`, center-crops it to `aspect`, flattens it to opaque RGB and
/// resamples it to exactly `width` x `height`, returning PNG bytes.
pub fn normalize(
    raw: &[u8],
    aspect: AspectRatio,
    width: u32,
    height: u32,
) -> Result<NormalizedImage, ContentError> {
    if width == 0 || height == 0 {
        return Err(ContentError::InvalidTarget { width, height });
    }

    let decoded = image::load_from_memory(raw).map_err(ContentError::Decode)?;
    let (x, y, crop_w, crop_h) = crop_window(decoded.width(), decoded.height(), aspect);
    let cropped = if (crop_w, crop_h) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.crop_imm(x, y, crop_w, crop_h)
    };

    let mut rgb = flatten_to_rgb(cropped);
    if rgb.dimensions() != (width, height) {
        rgb = image::imageops::resize(&rgb, width, height, FilterType::Lanczos3);
    }

    let png = encode_png(&rgb)?;
    Ok(NormalizedImage { width, height, png })
}

/// Returns `(x, y, width, height)` of the centered window matching `aspect`.
pub fn crop_window(width: u32, height: u32, aspect: AspectRatio) -> (u32, u32, u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0, width, height);
    }
    let current = width as f64 / height as f64;
    let target = aspect.value();
    if (current / target - 1.0).abs() < RATIO_TOLERANCE {
        return (0, 0, width, height);
    }

    if current > target {
        let crop_w = (height as u64 * aspect.width as u64 / aspect.height as u64) as u32;
        let crop_w = crop_w.clamp(1, width);
        ((width - crop_w) / 2, 0, crop_w, height)
    } else {
        let crop_h = (width as u64 * aspect.height as u64 / aspect.width as u64) as u32;
        let crop_h = crop_h.clamp(1, height);
        (0, (height - crop_h) / 2, width, crop_h)
    }
}

fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }

    // Composite over opaque white.
    let rgba = img.into_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let a = src[3] as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    out
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>, ContentError> {
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .map_err(ContentError::Encode)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, GenericImageView, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    const WIDE: AspectRatio = AspectRatio { width: 16, height: 9 };

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_crop_window_wider_input_trims_sides() {
        // 2:1 is wider than 16:9
        let (x, y, w, h) = crop_window(400, 200, WIDE);
        assert_eq!(w, 200 * 16 / 9);
        assert_eq!(w, 355);
        assert_eq!(x, (400 - 355) / 2);
        assert_eq!((y, h), (0, 200));
    }

    #[test]
    fn test_crop_window_taller_input_trims_top_and_bottom() {
        // 4:3 is taller than 16:9
        let (x, y, w, h) = crop_window(400, 300, WIDE);
        assert_eq!(h, 400 * 9 / 16);
        assert_eq!(h, 225);
        assert_eq!(y, (300 - 225) / 2);
        assert_eq!((x, w), (0, 400));
    }

    #[test]
    fn test_crop_window_within_tolerance_is_untouched() {
        assert_eq!(crop_window(1920, 1080, WIDE), (0, 0, 1920, 1080));
        assert_eq!(crop_window(1921, 1080, WIDE), (0, 0, 1921, 1080));
    }

    #[test]
    fn test_crop_tolerance_is_relative_to_target() {
        // 1.2% narrower than 1:2 is cropped even though the ratios differ by 0.006.
        let tall = AspectRatio { width: 1, height: 2 };
        assert_eq!(crop_window(247, 500, tall), (0, 3, 247, 494));

        // 0.7% wider than 21:9 is kept even though the ratios differ by 0.017.
        let ultrawide = AspectRatio { width: 21, height: 9 };
        assert_eq!(crop_window(2350, 1000, ultrawide), (0, 0, 2350, 1000));
    }

    #[test]
    fn test_normalize_alpha_is_composited_over_white() {
        let mut img = RgbaImage::from_pixel(64, 36, Rgba([255, 0, 0, 0]));
        img.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        let raw = png_bytes(DynamicImage::ImageRgba8(img));

        let out = normalize(&raw, WIDE, 64, 36).unwrap();
        let decoded = image::load_from_memory(&out.png).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
        assert_eq!(decoded.dimensions(), (64, 36));

        let rgb = decoded.to_rgb8();
        assert_eq!(rgb.get_pixel(10, 10), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_normalize_always_hits_target_size() {
        let inputs = [
            DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 50, Rgb([1, 2, 3]))),
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 90, Rgba([9, 9, 9, 128]))),
            DynamicImage::ImageLuma8(image::GrayImage::from_pixel(17, 13, Luma([200]))),
        ];
        for input in inputs {
            let out = normalize(&png_bytes(input), WIDE, 32, 18).unwrap();
            assert_eq!((out.width, out.height), (32, 18));

            let decoded = image::load_from_memory(&out.png).unwrap();
            assert_eq!(decoded.dimensions(), (32, 18));
            assert!(!decoded.color().has_alpha());
            assert_eq!(decoded.color(), ColorType::Rgb8);
        }
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        let err = normalize(b"definitely not an image", WIDE, 32, 18).unwrap_err();
        assert!(matches!(err, ContentError::Decode(_)));
    }

    #[test]
    fn test_normalize_rejects_zero_target() {
        let raw = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(4, 4)));
        assert!(matches!(
            normalize(&raw, WIDE, 0, 10),
            Err(ContentError::InvalidTarget { .. })
        ));
    }
}
