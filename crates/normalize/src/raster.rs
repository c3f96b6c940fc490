use image::{Rgba, RgbaImage};
use resvg::{tiny_skia, usvg};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::preprocess;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Invalid SVG markup: {0}")]
    Parse(String),
    #[error("Could not allocate a {0}x{1} canvas")]
    Canvas(u32, u32),
    #[error("PNG encoding failed: {0}")]
    Encode(String),
    #[error("No rasterizer available")]
    NotAvailable,
}

/// Turns SVG markup into PNG bytes.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, svg: &str) -> Result<Vec<u8>, RasterError>;
}

// ── resvg backend (default) ───────────────────────────────────────────────────

fn shared_fontdb() -> Arc<usvg::fontdb::Database> {
    static DB: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    DB.get_or_init(|| {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "loaded system fonts for placeholder rendering");
        Arc::new(db)
    })
    .clone()
}

/// Pure-Rust SVG renderer. System fonts are loaded once per process; on a
/// host without fonts text is simply not drawn.
#[derive(Clone)]
pub struct ResvgRasterizer {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl ResvgRasterizer {
    pub fn new() -> Self {
        Self { fontdb: shared_fontdb() }
    }
}

impl Default for ResvgRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rasterizer for ResvgRasterizer {
    fn rasterize(&self, svg: &str) -> Result<Vec<u8>, RasterError> {
        let mut options = usvg::Options::default();
        options.fontdb = self.fontdb.clone();

        let tree = usvg::Tree::from_str(svg, &options).map_err(|e| RasterError::Parse(e.to_string()))?;
        let size = tree.size().to_int_size();
        let (width, height) = (size.width(), size.height());

        let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or(RasterError::Canvas(width, height))?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        // tiny-skia stores premultiplied alpha.
        let mut rgba = RgbaImage::new(width, height);
        for (dst, src) in rgba.pixels_mut().zip(pixmap.pixels()) {
            let c = src.demultiply();
            *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }

        preprocess::encode_png(&rgba).map_err(|e| RasterError::Encode(e.to_string()))
    }
}

// ── Null backend ──────────────────────────────────────────────────────────────

/// Always fails, which sends every placeholder down its fallback path.
/// Useful for hosts that must not render and for exercising fallbacks.
pub struct NullRasterizer;

impl Rasterizer for NullRasterizer {
    fn rasterize(&self, _svg: &str) -> Result<Vec<u8>, RasterError> {
        Err(RasterError::NotAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="10" viewBox="0 0 20 10"><rect width="20" height="10" fill="#ff0000"/></svg>"##;

    #[test]
    fn renders_png_of_declared_size() {
        let png = ResvgRasterizer::new().rasterize(SQUARE).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (20, 10));
        assert_eq!(img.get_pixel(5, 5), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn malformed_markup_is_a_parse_error() {
        let err = ResvgRasterizer::new().rasterize("<svg").unwrap_err();
        assert!(matches!(err, RasterError::Parse(_)));
    }

    #[test]
    fn null_rasterizer_always_fails() {
        assert!(matches!(NullRasterizer.rasterize(SQUARE), Err(RasterError::NotAvailable)));
    }
}
