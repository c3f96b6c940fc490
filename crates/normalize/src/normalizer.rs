use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ledgerdocs_core::{NormalizerConfig, MAX_DOCUMENT_BYTES};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::kind::{ImageKind, SourceKind};
use crate::placeholder::{self, MINIMAL_PNG_DATA_URL};
use crate::preprocess::{self, PreprocessError};
use crate::raster::{Rasterizer, ResvgRasterizer};

pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";
pub const CONTENT_TYPE_PNG: &str = "image/png";
pub const CONTENT_TYPE_SVG: &str = "image/svg+xml";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Receipt '{name}' is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge { name: String, size: u64, limit: u64 },
    #[error("Could not decode image receipt '{name}': {reason}")]
    Decode { name: String, reason: String },
    #[error("Could not re-encode image receipt '{name}': {reason}")]
    Encode { name: String, reason: String },
    #[error("Normalization of '{name}' did not complete: {reason}")]
    Interrupted { name: String, reason: String },
}

/// An embeddable rendering of one receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReceipt {
    pub data_url: String,
    /// Always one of image/jpeg, image/png, image/svg+xml.
    pub content_type: String,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Set whenever the rendering is lossy or stands in for the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_note: Option<String>,
}

impl NormalizedReceipt {
    fn new(bytes: &[u8], content_type: &str, name: &str, note: Option<String>) -> Self {
        NormalizedReceipt {
            data_url: data_url(content_type, bytes),
            content_type: content_type.to_string(),
            original_name: name.to_string(),
            page_count: None,
            conversion_note: note,
        }
    }

    /// Decoded payload of the data URL.
    pub fn payload(&self) -> Option<Vec<u8>> {
        let (_, encoded) = self.data_url.split_once(";base64,")?;
        STANDARD.decode(encoded).ok()
    }
}

pub fn data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{content_type};base64,{}", STANDARD.encode(bytes))
}

/// Converts uploaded receipts into images an invoice PDF can embed.
///
/// Total over inputs: only an oversized input or an image that cannot be
/// decoded is an error; every other input yields at least a placeholder.
#[derive(Clone)]
pub struct ReceiptNormalizer {
    config: NormalizerConfig,
    rasterizer: Arc<dyn Rasterizer>,
}

impl Default for ReceiptNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

impl ReceiptNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self::with_rasterizer(config, Arc::new(ResvgRasterizer::new()))
    }

    /// `max_receipt_bytes` is capped at [`MAX_DOCUMENT_BYTES`] whatever the
    /// configuration asks for.
    pub fn with_rasterizer(mut config: NormalizerConfig, rasterizer: Arc<dyn Rasterizer>) -> Self {
        config.max_receipt_bytes = config.max_receipt_bytes.min(MAX_DOCUMENT_BYTES);
        Self { config, rasterizer }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize_to_data_urls(
        &self,
        data: &[u8],
        content_type: &str,
        name: &str,
    ) -> Result<Vec<NormalizedReceipt>, NormalizeError> {
        // 1. Size ceiling, before any format-specific work.
        let size = data.len() as u64;
        if size > self.config.max_receipt_bytes {
            return Err(NormalizeError::TooLarge {
                name: name.to_string(),
                size,
                limit: self.config.max_receipt_bytes,
            });
        }

        let kind = SourceKind::from_content_type(content_type);
        debug!(receipt = name, %kind, size, "normalizing receipt");

        // 2. Dispatch.
        let receipt = match kind {
            SourceKind::Image(image_kind) => self.normalize_image(data, image_kind, name)?,
            SourceKind::Pdf => self.normalize_pdf(name),
            SourceKind::Text => self.normalize_text(data, name),
            SourceKind::Unsupported(declared) => self.normalize_unsupported(&declared, name),
        };
        Ok(vec![receipt])
    }

    fn normalize_image(
        &self,
        data: &[u8],
        kind: ImageKind,
        name: &str,
    ) -> Result<NormalizedReceipt, NormalizeError> {
        let img = preprocess::decode(data, kind).map_err(|e| match e {
            PreprocessError::Decode(reason) | PreprocessError::Encode(reason) => {
                NormalizeError::Decode { name: name.to_string(), reason }
            }
        })?;

        let (width, height) = (img.width(), img.height());
        let img = preprocess::fit_within(img, self.config.max_image_dimension);
        if img.width() != width || img.height() != height {
            debug!(receipt = name, width, height, new_width = img.width(), new_height = img.height(), "downscaled receipt image");
        }

        let jpeg = preprocess::encode_jpeg(&img, self.config.jpeg_quality).map_err(|e| {
            NormalizeError::Encode { name: name.to_string(), reason: e.to_string() }
        })?;

        let note = kind
            .is_heic()
            .then(|| "Converted from HEIC to JPEG for embedding".to_string());
        Ok(NormalizedReceipt::new(&jpeg, CONTENT_TYPE_JPEG, name, note))
    }

    /// One placeholder per PDF regardless of page count; the original PDF
    /// travels as a separate attachment.
    fn normalize_pdf(&self, name: &str) -> NormalizedReceipt {
        let note = Some(format!(
            "PDF receipt attached separately; placeholder shown in place of {name}"
        ));
        let svg = placeholder::pdf_placeholder_svg(name);
        match self.rasterizer.rasterize(&svg) {
            Ok(png) => NormalizedReceipt::new(&png, CONTENT_TYPE_PNG, name, note),
            Err(e) => {
                warn!(receipt = name, error = %e, "PDF placeholder rendering failed, using minimal image");
                NormalizedReceipt {
                    data_url: MINIMAL_PNG_DATA_URL.to_string(),
                    content_type: CONTENT_TYPE_PNG.to_string(),
                    original_name: name.to_string(),
                    page_count: None,
                    conversion_note: note,
                }
            }
        }
    }

    fn normalize_text(&self, data: &[u8], name: &str) -> NormalizedReceipt {
        let text = String::from_utf8_lossy(data);
        let layout = placeholder::text_svg(&text, self.config.max_text_lines);
        let note = if layout.truncated() {
            format!(
                "Text receipt truncated to the first {} of {} lines",
                layout.lines_rendered, layout.total_lines
            )
        } else {
            "Rendered from plain text".to_string()
        };
        self.rasterize_or_svg(&layout.svg, name, note)
    }

    fn normalize_unsupported(&self, declared: &str, name: &str) -> NormalizedReceipt {
        let shown = if declared.is_empty() { "unknown" } else { declared };
        let note = format!("Unsupported format ({shown}); placeholder shown for {name}");
        let svg = placeholder::unsupported_svg(name, declared);
        self.rasterize_or_svg(&svg, name, note)
    }

    fn rasterize_or_svg(&self, svg: &str, name: &str, note: String) -> NormalizedReceipt {
        match self.rasterizer.rasterize(svg) {
            Ok(png) => NormalizedReceipt::new(&png, CONTENT_TYPE_PNG, name, Some(note)),
            Err(e) => {
                warn!(receipt = name, error = %e, "rasterization failed, embedding vector markup");
                NormalizedReceipt::new(svg.as_bytes(), CONTENT_TYPE_SVG, name, Some(note))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::NullRasterizer;
    use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
    use std::io::Cursor;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, 90])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    fn null_normalizer() -> ReceiptNormalizer {
        ReceiptNormalizer::with_rasterizer(NormalizerConfig::default(), Arc::new(NullRasterizer))
    }

    #[test]
    fn size_guard_runs_before_decode() {
        let config = NormalizerConfig { max_receipt_bytes: 16, ..Default::default() };
        let normalizer = ReceiptNormalizer::with_rasterizer(config, Arc::new(NullRasterizer));
        // Garbage would be a Decode error if decoding were attempted.
        let err = normalizer
            .normalize_to_data_urls(&[0u8; 17], "image/jpeg", "big.jpg")
            .unwrap_err();
        match err {
            NormalizeError::TooLarge { name, size, limit } => {
                assert_eq!(name, "big.jpg");
                assert_eq!(size, 17);
                assert_eq!(limit, 16);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn configured_limit_is_capped_at_the_ceiling() {
        let config = NormalizerConfig { max_receipt_bytes: 1_000_000_000, ..Default::default() };
        let normalizer = ReceiptNormalizer::with_rasterizer(config, Arc::new(NullRasterizer));
        assert_eq!(normalizer.config().max_receipt_bytes, MAX_DOCUMENT_BYTES);

        let oversized = vec![0u8; MAX_DOCUMENT_BYTES as usize + 1];
        let err = normalizer.normalize_to_data_urls(&oversized, "text/plain", "huge.txt").unwrap_err();
        assert!(matches!(err, NormalizeError::TooLarge { limit, .. } if limit == MAX_DOCUMENT_BYTES));
    }

    #[test]
    fn exactly_at_limit_is_accepted() {
        let config = NormalizerConfig { max_receipt_bytes: 4, ..Default::default() };
        let normalizer = ReceiptNormalizer::with_rasterizer(config, Arc::new(NullRasterizer));
        let out = normalizer.normalize_to_data_urls(b"abcd", "text/plain", "t.txt").unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn image_is_reencoded_as_jpeg() {
        let out = null_normalizer()
            .normalize_to_data_urls(&jpeg_bytes(40, 30), "image/jpeg", "small.jpg")
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content_type, CONTENT_TYPE_JPEG);
        assert!(out[0].data_url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(out[0].conversion_note, None);
        let decoded = image::load_from_memory(&out[0].payload().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn undecodable_image_is_fatal() {
        let err = null_normalizer()
            .normalize_to_data_urls(b"not really a png", "image/png", "broken.png")
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Decode { ref name, .. } if name == "broken.png"));
    }

    #[test]
    fn pdf_falls_back_to_minimal_png() {
        let out = null_normalizer()
            .normalize_to_data_urls(b"%PDF-1.7 ...", "application/pdf", "invoice.pdf")
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data_url, MINIMAL_PNG_DATA_URL);
        assert_eq!(out[0].content_type, CONTENT_TYPE_PNG);
        assert!(out[0].conversion_note.as_deref().unwrap().contains("PDF"));
    }

    #[test]
    fn text_falls_back_to_svg() {
        let out = null_normalizer()
            .normalize_to_data_urls(b"Coffee  $4.50\nTotal  $4.50", "text/plain", "coffee.txt")
            .unwrap();
        assert_eq!(out[0].content_type, CONTENT_TYPE_SVG);
        let svg = String::from_utf8(out[0].payload().unwrap()).unwrap();
        assert!(svg.contains("Coffee  $4.50"));
    }

    #[test]
    fn unsupported_note_mentions_declared_type() {
        let out = null_normalizer()
            .normalize_to_data_urls(b"PK\x03\x04", "application/zip", "bundle.zip")
            .unwrap();
        let note = out[0].conversion_note.as_deref().unwrap();
        assert!(note.contains("application/zip"));
        assert!(note.contains("bundle.zip"));
    }

    #[test]
    fn receipt_serializes_camel_case() {
        let receipt = NormalizedReceipt::new(b"x", CONTENT_TYPE_PNG, "a.png", None);
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["dataUrl"], "data:image/png;base64,eA==");
        assert_eq!(value["originalName"], "a.png");
        assert!(value.get("conversionNote").is_none());
    }
}
