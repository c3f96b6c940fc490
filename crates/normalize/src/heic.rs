//! HEIC/HEIF decoding through libheif (gated behind the `heic` feature).

use image::{DynamicImage, RgbImage};
use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

/// Decode the primary image of a HEIF container into an RGB image.
pub fn decode(data: &[u8]) -> Result<DynamicImage, String> {
    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(data).map_err(|e| e.to_string())?;
    let handle = ctx.primary_image_handle().map_err(|e| e.to_string())?;
    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| e.to_string())?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| "HEIF image has no interleaved RGB plane".to_string())?;

    let width = plane.width;
    let height = plane.height;
    let row_bytes = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in plane.data.chunks(plane.stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_bytes]);
    }

    RgbImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| format!("HEIF plane does not match {width}x{height}"))
}
