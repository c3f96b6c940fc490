pub mod config;
pub mod document;
pub mod naming;

pub use config::{
    BackendKind, CloudStorageConfig, ConfigError, LedgerDocsConfig, LocalStorageConfig,
    NormalizerConfig,
};
pub use document::{
    sort_newest_first, DocumentFilter, DocumentMetadata, DocumentType, MetadataPatch,
    StorageStats, StoredDocument, TypeStats, MAX_DOCUMENT_BYTES, METADATA_VERSION,
};
