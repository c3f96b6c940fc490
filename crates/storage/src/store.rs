use async_trait::async_trait;
use ledgerdocs_core::{
    DocumentFilter, DocumentMetadata, MetadataPatch, StorageStats, StoredDocument,
};

use crate::error::{StorageError, StorageResult};

/// Everything needed to persist a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub content_type: String,
    pub metadata: DocumentMetadata,
    pub uploaded_by: String,
    /// Preserves an externally assigned id; a fresh one is generated otherwise.
    pub id: Option<String>,
}

impl NewDocument {
    pub fn new(
        bytes: Vec<u8>,
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        metadata: DocumentMetadata,
        uploaded_by: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            original_name: original_name.into(),
            content_type: content_type.into(),
            metadata,
            uploaded_by: uploaded_by.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentContent {
    pub bytes: Vec<u8>,
    pub document: StoredDocument,
}

/// Storage contract shared by the local and cloud backends.
///
/// Lookups answer `Ok(None)` / `Ok(false)` both when a document does not
/// exist and when its state cannot be determined; mutations propagate errors.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn store(&self, doc: NewDocument) -> StorageResult<StoredDocument>;

    async fn get_metadata(&self, id: &str) -> StorageResult<Option<StoredDocument>>;

    async fn get_content(&self, id: &str) -> StorageResult<Option<DocumentContent>>;

    /// Matching documents, newest first.
    async fn list(&self, filter: &DocumentFilter) -> StorageResult<Vec<StoredDocument>>;

    async fn delete(&self, id: &str) -> StorageResult<bool>;

    async fn update_metadata(
        &self,
        id: &str,
        patch: &MetadataPatch,
    ) -> StorageResult<Option<StoredDocument>>;

    /// Recomputed from a full listing on every call.
    async fn stats(&self) -> StorageResult<StorageStats> {
        let docs = self.list(&DocumentFilter::all()).await?;
        Ok(StorageStats::from_documents(&docs))
    }
}

pub(crate) fn check_size(file_name: &str, size: usize, limit: u64) -> StorageResult<()> {
    let size = size as u64;
    if size > limit {
        return Err(StorageError::TooLarge { file_name: file_name.to_string(), size, limit });
    }
    Ok(())
}
