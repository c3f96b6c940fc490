use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

use crate::kind::ImageKind;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// Decode image bytes. The container is sniffed from the bytes, so a JPEG
/// uploaded with a HEIC content type still decodes.
pub fn decode(data: &[u8], kind: ImageKind) -> Result<DynamicImage, PreprocessError> {
    match image::load_from_memory(data) {
        Ok(img) => Ok(img),
        Err(err) if kind.is_heic() => decode_heic(data).map_err(|heic_err| {
            PreprocessError::Decode(format!("{err}; HEIC decoder: {heic_err}"))
        }),
        Err(err) => Err(PreprocessError::Decode(err.to_string())),
    }
}

#[cfg(feature = "heic")]
fn decode_heic(data: &[u8]) -> Result<DynamicImage, String> {
    crate::heic::decode(data)
}

#[cfg(not(feature = "heic"))]
fn decode_heic(_data: &[u8]) -> Result<DynamicImage, String> {
    Err("HEIC support not compiled in, build with the `heic` feature".to_string())
}

/// Downscale so neither side exceeds `max_dimension`, preserving aspect
/// ratio. Images already within bounds are returned untouched.
pub fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width() <= max_dimension && img.height() <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

/// JPEG has no alpha channel, so everything is flattened to RGB first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, PreprocessError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage, Rgba};

    fn solid_rgb(width: u32, height: u32) -> DynamicImage {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let result = fit_within(solid_rgb(300, 200), 1600);
        assert_eq!((result.width(), result.height()), (300, 200));
    }

    #[test]
    fn large_image_keeps_aspect_ratio() {
        let result = fit_within(solid_rgb(2400, 1800), 1600);
        assert_eq!((result.width(), result.height()), (1600, 1200));
    }

    #[test]
    fn tall_image_is_bounded_by_height() {
        let result = fit_within(solid_rgb(500, 4000), 1600);
        assert_eq!(result.height(), 1600);
        assert_eq!(result.width(), 200);
    }

    #[test]
    fn jpeg_output_has_soi_marker() {
        let jpeg = encode_jpeg(&solid_rgb(8, 8), 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn alpha_is_flattened_for_jpeg() {
        let rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0]));
        let jpeg = encode_jpeg(&DynamicImage::ImageRgba8(rgba), 85).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 4));
    }

    #[test]
    fn garbage_does_not_decode() {
        let err = decode(b"definitely not an image", ImageKind::Jpeg).unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn png_encode_has_magic() {
        let png = encode_png(&RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]))).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }
}
