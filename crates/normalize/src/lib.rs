//! Receipt normalization: turns uploaded receipt bytes into images an
//! invoice PDF can embed.

pub mod batch;
#[cfg(feature = "heic")]
mod heic;
pub mod kind;
pub mod normalizer;
pub mod placeholder;
pub mod preprocess;
pub mod raster;

pub use batch::{BatchItem, BatchOutcome};
pub use kind::{ImageKind, SourceKind};
pub use normalizer::{
    data_url, NormalizeError, NormalizedReceipt, ReceiptNormalizer, CONTENT_TYPE_JPEG,
    CONTENT_TYPE_PNG, CONTENT_TYPE_SVG,
};
pub use placeholder::MINIMAL_PNG_DATA_URL;
pub use preprocess::PreprocessError;
pub use raster::{NullRasterizer, RasterError, Rasterizer, ResvgRasterizer};

pub use ledgerdocs_core::config::{
    DEFAULT_JPEG_QUALITY as JPEG_QUALITY, DEFAULT_MAX_IMAGE_DIMENSION as MAX_IMAGE_DIMENSION,
    DEFAULT_MAX_PDF_PAGES as MAX_PDF_PAGES,
};
pub use ledgerdocs_core::MAX_DOCUMENT_BYTES as MAX_RECEIPT_BYTES;
