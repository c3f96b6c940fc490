//! Remote document-library backend: one folder per document type in the
//! library configured for the current environment.

mod graph;
mod settings;

pub use graph::{DriveItem, GraphClient};
pub use settings::{EnvSettings, NoSettings, SettingsSource, StaticSettings, StaticToken, TokenProvider};

use async_trait::async_trait;
use chrono::Utc;
use ledgerdocs_core::naming::{generate_file_name, is_sidecar_name, new_document_id, sidecar_file_name};
use ledgerdocs_core::{
    sort_newest_first, CloudStorageConfig, DocumentFilter, DocumentType, MetadataPatch, StoredDocument,
    MAX_DOCUMENT_BYTES,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::{check_size, DocumentContent, DocumentStore, NewDocument};

const SIDECAR_CONTENT_TYPE: &str = "application/json";

/// Site and library the current environment writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTarget {
    pub site_url: String,
    pub library_name: String,
}

/// A sidecar found in a type folder.
struct Located {
    document_type: DocumentType,
    sidecar_name: String,
    document: StoredDocument,
}

/// Drive and folder identity are re-resolved on every call; nothing is cached.
pub struct CloudDocumentStore {
    config: CloudStorageConfig,
    graph: GraphClient,
    settings: Arc<dyn SettingsSource>,
}

impl CloudDocumentStore {
    pub fn new(
        config: CloudStorageConfig,
        settings: Arc<dyn SettingsSource>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let mut config = config;
        config.max_document_bytes = config.max_document_bytes.min(MAX_DOCUMENT_BYTES);
        let graph = GraphClient::new(config.graph_base_url.clone(), tokens);
        Self { config, graph, settings }
    }

    pub fn max_document_bytes(&self) -> u64 {
        self.config.max_document_bytes
    }

    async fn setting(&self, key: &str) -> Option<String> {
        match self.settings.get(key).await {
            Ok(Some(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Ok(_) => {
                debug!(key, "setting absent, using default");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "settings lookup failed, using default");
                None
            }
        }
    }

    /// Environment-specific overrides with the configured defaults as
    /// fallback. Never fails.
    pub async fn resolve_target(&self) -> CloudTarget {
        let site_url = self
            .setting(&self.config.site_url_key())
            .await
            .unwrap_or_else(|| self.config.default_site_url.clone());
        let library_name = self
            .setting(&self.config.library_name_key())
            .await
            .unwrap_or_else(|| self.config.default_library_name.clone());
        CloudTarget { site_url, library_name }
    }

    async fn drive_id(&self) -> StorageResult<String> {
        let target = self.resolve_target().await;
        let site_id = self.graph.site_id(&target.site_url).await?;
        self.graph.drive_id(&site_id, &target.library_name).await
    }

    pub async fn ensure_folder(&self, name: &str) -> StorageResult<()> {
        let drive_id = self.drive_id().await?;
        match self.graph.get_item(&drive_id, &[name]).await? {
            Some(_) => Ok(()),
            None => self.graph.create_folder(&drive_id, name).await,
        }
    }

    /// Upload into `<type>/<name>` and return the item's web URL.
    pub async fn upload(
        &self,
        document_type: DocumentType,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String> {
        check_size(name, bytes.len(), self.config.max_document_bytes)?;
        let folder = document_type.as_str();
        self.ensure_folder(folder).await?;

        let drive_id = self.drive_id().await?;
        let size = bytes.len();
        let item = self.graph.upload(&drive_id, &[folder, name], bytes, content_type).await?;
        debug!(folder, file = name, size, "uploaded to document library");
        item.web_url.ok_or_else(|| StorageError::Remote {
            status: 200,
            context: format!("upload of {folder}/{name} returned no web URL"),
        })
    }

    pub async fn download(&self, document_type: DocumentType, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let folder = document_type.as_str();
        let result: StorageResult<Option<Vec<u8>>> = async {
            let drive_id = self.drive_id().await?;
            self.graph.download(&drive_id, &[folder, name]).await
        }
        .await;
        Ok(collapse(result, folder, name))
    }

    pub async fn get_url(&self, document_type: DocumentType, name: &str) -> StorageResult<Option<String>> {
        let folder = document_type.as_str();
        let result: StorageResult<Option<String>> = async {
            let drive_id = self.drive_id().await?;
            Ok(self.graph.get_item(&drive_id, &[folder, name]).await?.and_then(|item| item.web_url))
        }
        .await;
        Ok(collapse(result, folder, name))
    }

    pub async fn delete_file(&self, document_type: DocumentType, name: &str) -> StorageResult<bool> {
        let drive_id = self.drive_id().await?;
        self.graph.delete(&drive_id, &[document_type.as_str(), name]).await
    }

    /// Items in a type folder; a folder that does not exist yet is empty.
    pub async fn list_folder(&self, document_type: DocumentType) -> StorageResult<Vec<DriveItem>> {
        let drive_id = self.drive_id().await?;
        let items = self.graph.children(&drive_id, document_type.as_str()).await?;
        Ok(items.unwrap_or_default())
    }

    async fn upload_sidecar(&self, sidecar_name: &str, document: &StoredDocument) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| StorageError::json(sidecar_name, e))?;
        self.upload(document.metadata.document_type, sidecar_name, json, SIDECAR_CONTENT_TYPE)
            .await
            .map(|_| ())
    }

    /// Every readable sidecar in the given type folders. Folders that cannot
    /// be listed and sidecars that cannot be read are logged and skipped.
    async fn sidecars(&self, types: &[DocumentType]) -> Vec<Located> {
        let mut found = Vec::new();
        for &document_type in types {
            let items = match self.list_folder(document_type).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(folder = document_type.as_str(), error = %e, "skipping unreadable folder");
                    continue;
                }
            };
            for item in items.into_iter().filter(|i| !i.is_folder() && is_sidecar_name(&i.name)) {
                let Ok(Some(raw)) = self.download(document_type, &item.name).await else {
                    continue;
                };
                match serde_json::from_slice::<StoredDocument>(&raw) {
                    Ok(document) => found.push(Located { document_type, sidecar_name: item.name, document }),
                    Err(e) => warn!(folder = document_type.as_str(), file = %item.name, error = %e, "skipping unreadable sidecar"),
                }
            }
        }
        found
    }

    async fn locate(&self, id: &str) -> Option<Located> {
        self.sidecars(&DocumentType::ALL).await.into_iter().find(|l| l.document.id == id)
    }
}

fn collapse<T>(result: StorageResult<Option<T>>, folder: &str, name: &str) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(folder, file = name, error = %e, "document library lookup failed");
            None
        }
    }
}

#[async_trait]
impl DocumentStore for CloudDocumentStore {
    async fn store(&self, doc: NewDocument) -> StorageResult<StoredDocument> {
        check_size(&doc.original_name, doc.bytes.len(), self.config.max_document_bytes)?;

        let id = match doc.id {
            Some(id) => {
                if self.locate(&id).await.is_some() {
                    return Err(StorageError::DuplicateId(id));
                }
                id
            }
            None => new_document_id(),
        };

        let document_type = doc.metadata.document_type;
        let file_name = generate_file_name(&doc.original_name);
        let size = doc.bytes.len() as u64;
        let web_url = self.upload(document_type, &file_name, doc.bytes, &doc.content_type).await?;

        let stored = StoredDocument {
            id,
            file_name: file_name.clone(),
            original_name: doc.original_name,
            storage_locator: web_url,
            size,
            content_type: doc.content_type,
            metadata: doc.metadata,
            uploaded_at: Utc::now(),
            uploaded_by: doc.uploaded_by,
        };

        if let Err(e) = self.upload_sidecar(&sidecar_file_name(&file_name), &stored).await {
            warn!(id = %stored.id, file = %file_name, error = %e, "sidecar upload failed, removing bytes");
            if let Err(cleanup) = self.delete_file(document_type, &file_name).await {
                warn!(id = %stored.id, file = %file_name, error = %cleanup, "could not remove orphaned bytes");
            }
            return Err(e);
        }

        info!(id = %stored.id, folder = document_type.as_str(), file = %file_name, size, "stored document");
        Ok(stored)
    }

    async fn get_metadata(&self, id: &str) -> StorageResult<Option<StoredDocument>> {
        Ok(self.locate(id).await.map(|l| l.document))
    }

    async fn get_content(&self, id: &str) -> StorageResult<Option<DocumentContent>> {
        let Some(located) = self.locate(id).await else {
            return Ok(None);
        };
        let bytes = self.download(located.document_type, &located.document.file_name).await?;
        if bytes.is_none() {
            warn!(id, file = %located.document.file_name, "document bytes are missing");
        }
        Ok(bytes.map(|bytes| DocumentContent { bytes, document: located.document }))
    }

    async fn list(&self, filter: &DocumentFilter) -> StorageResult<Vec<StoredDocument>> {
        let types: Vec<DocumentType> = match filter.document_type {
            Some(document_type) => vec![document_type],
            None => DocumentType::ALL.to_vec(),
        };
        let mut docs: Vec<StoredDocument> = self
            .sidecars(&types)
            .await
            .into_iter()
            .map(|l| l.document)
            .filter(|doc| filter.matches(doc))
            .collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        let Some(located) = self.locate(id).await else {
            return Ok(false);
        };
        // Without its sidecar the document is no longer discoverable.
        self.delete_file(located.document_type, &located.sidecar_name).await?;
        match self.delete_file(located.document_type, &located.document.file_name).await {
            Ok(true) => {}
            Ok(false) => warn!(id, file = %located.document.file_name, "document bytes were already gone"),
            Err(e) => warn!(id, file = %located.document.file_name, error = %e, "orphaned document bytes left behind"),
        }
        info!(id, folder = located.document_type.as_str(), "deleted document");
        Ok(true)
    }

    async fn update_metadata(
        &self,
        id: &str,
        patch: &MetadataPatch,
    ) -> StorageResult<Option<StoredDocument>> {
        let Some(mut located) = self.locate(id).await else {
            return Ok(None);
        };
        patch.apply(&mut located.document.metadata);
        self.upload_sidecar(&located.sidecar_name, &located.document).await?;
        debug!(id, file = %located.sidecar_name, "updated document metadata");
        Ok(Some(located.document))
    }
}
