use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::document::MAX_DOCUMENT_BYTES;

pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1600;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_MAX_TEXT_LINES: usize = 200;
/// Reserved for when PDF rasterization is re-enabled; nothing reads it today.
pub const DEFAULT_MAX_PDF_PAGES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Local,
    Cloud,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    /// Directory holding one sub-directory per document type.
    pub root: PathBuf,
    pub max_document_bytes: u64,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/documents"),
            max_document_bytes: MAX_DOCUMENT_BYTES,
        }
    }
}

impl LocalStorageConfig {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudStorageConfig {
    pub graph_base_url: String,
    /// Deployment environment used to pick per-environment settings keys.
    pub environment: String,
    pub default_site_url: String,
    pub default_library_name: String,
    pub max_document_bytes: u64,
}

impl Default for CloudStorageConfig {
    fn default() -> Self {
        Self {
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            environment: "development".to_string(),
            default_site_url: "https://example.sharepoint.com/sites/billing".to_string(),
            default_library_name: "Documents".to_string(),
            max_document_bytes: MAX_DOCUMENT_BYTES,
        }
    }
}

impl CloudStorageConfig {
    pub fn site_url_key(&self) -> String {
        format!("sharepoint_site_url_{}", self.environment)
    }

    pub fn library_name_key(&self) -> String {
        format!("sharepoint_library_name_{}", self.environment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub max_receipt_bytes: u64,
    pub max_image_dimension: u32,
    pub jpeg_quality: u8,
    pub max_text_lines: usize,
    pub max_pdf_pages: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_receipt_bytes: MAX_DOCUMENT_BYTES,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_text_lines: DEFAULT_MAX_TEXT_LINES,
            max_pdf_pages: DEFAULT_MAX_PDF_PAGES,
        }
    }
}

/// Top-level `ledgerdocs.toml`.
///
/// ```toml
/// backend = "local"
///
/// [local]
/// root = "/var/lib/ledgerdocs"
///
/// [cloud]
/// environment = "production"
///
/// [normalizer]
/// max_image_dimension = 1600
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerDocsConfig {
    pub backend: BackendKind,
    pub local: LocalStorageConfig,
    pub cloud: CloudStorageConfig,
    pub normalizer: NormalizerConfig,
}

impl LedgerDocsConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
