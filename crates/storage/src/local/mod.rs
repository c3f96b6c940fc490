//! Filesystem backend: `<root>/<documentType>/<fileName>` plus a JSON sidecar
//! beside every stored file.

mod index;
mod locks;
mod sidecar;

use async_trait::async_trait;
use chrono::Utc;
use ledgerdocs_core::naming::{generate_file_name, new_document_id, safe_component, sidecar_file_name, SIDECAR_SUFFIX};
use ledgerdocs_core::{
    sort_newest_first, DocumentFilter, DocumentType, LocalStorageConfig, MetadataPatch, StoredDocument,
    MAX_DOCUMENT_BYTES,
};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::{check_size, DocumentContent, DocumentStore, NewDocument};
use index::IdIndex;
use locks::IdLocks;
pub use index::INDEX_FILE_NAME;
use sidecar::{read_sidecar, sidecars_in, write_atomic, write_sidecar};

pub const TRASH_DIR_NAME: &str = ".trash";

pub struct LocalFileStorage {
    root: PathBuf,
    max_document_bytes: u64,
    index: IdIndex,
    locks: IdLocks,
}

impl LocalFileStorage {
    /// The configured size limit never exceeds [`MAX_DOCUMENT_BYTES`].
    pub fn new(config: &LocalStorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            max_document_bytes: config.max_document_bytes.min(MAX_DOCUMENT_BYTES),
            index: IdIndex::new(&config.root),
            locks: IdLocks::default(),
        }
    }

    pub fn max_document_bytes(&self) -> u64 {
        self.max_document_bytes
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, document_type: DocumentType) -> PathBuf {
        self.root.join(document_type.as_str())
    }

    fn trash_root(&self) -> PathBuf {
        self.root.join(TRASH_DIR_NAME)
    }

    /// Fresh trash directory for one delete. Ids that sanitize to the same
    /// component still get distinct directories.
    fn trash_dir_for(&self, id: &str) -> PathBuf {
        self.trash_root().join(format!("{}.{:08x}", safe_component(id), rand::random::<u32>()))
    }

    /// `/`-separated path of `path` below the root.
    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
        Some(parts?.join("/"))
    }

    /// Every readable sidecar under the given type directories. Unreadable or
    /// corrupt sidecars are logged and skipped.
    async fn scan(&self, types: &[DocumentType]) -> Vec<(PathBuf, StoredDocument)> {
        let mut found = Vec::new();
        for &document_type in types {
            let dir = self.type_dir(document_type);
            let paths = match sidecars_in(&dir).await {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping unreadable document directory");
                    continue;
                }
            };
            for path in paths {
                match read_sidecar(&path).await {
                    Ok(doc) => found.push((path, doc)),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable sidecar"),
                }
            }
        }
        found
    }

    /// Find the sidecar for `id`: the index first, then a full scan that
    /// repairs the index entry.
    async fn locate(&self, id: &str) -> Option<(PathBuf, StoredDocument)> {
        let indexed = self.index.lookup(id).await;
        if let Some(relative) = &indexed {
            let path = self.root.join(relative);
            match read_sidecar(&path).await {
                Ok(doc) if doc.id == id => return Some((path, doc)),
                Ok(_) => debug!(id, path = %path.display(), "index entry points at another document"),
                Err(e) => debug!(id, path = %path.display(), error = %e, "stale index entry"),
            }
        }

        let hit = self.scan(&DocumentType::ALL).await.into_iter().find(|(_, doc)| doc.id == id);
        match &hit {
            Some((path, _)) => {
                if let Some(relative) = self.relative(path) {
                    debug!(id, path = %relative, "repaired index entry from scan");
                    self.index.insert(id, &relative).await;
                }
            }
            None if indexed.is_some() => self.index.remove(id).await,
            None => {}
        }
        hit
    }

    /// Candidate locations of a document's bytes, all inside the root: the
    /// sidecar's sibling, then the recorded locator. A locator outside the
    /// root (a copied or moved store) is never used.
    fn byte_paths(&self, sidecar_path: &Path, doc: &StoredDocument) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(name) = sidecar_path.file_name().and_then(|n| n.to_str()) {
            if let Some(stem) = name.strip_suffix(SIDECAR_SUFFIX) {
                let sibling = sidecar_path.with_file_name(stem);
                if sibling.starts_with(&self.root) {
                    paths.push(sibling);
                }
            }
        }
        let locator = PathBuf::from(&doc.storage_locator);
        if locator.starts_with(&self.root) && !paths.contains(&locator) {
            paths.push(locator);
        } else if !paths.contains(&locator) {
            debug!(id = %doc.id, locator = %doc.storage_locator, "ignoring locator outside the storage root");
        }
        paths
    }

    /// Full scan that rewrites the index. Returns the number of documents indexed.
    pub async fn rebuild_index(&self) -> StorageResult<usize> {
        let mut entries = BTreeMap::new();
        for (path, doc) in self.scan(&DocumentType::ALL).await {
            let Some(relative) = self.relative(&path) else { continue };
            if let Some(previous) = entries.insert(doc.id.clone(), relative) {
                warn!(id = %doc.id, previous = %previous, "duplicate document id across sidecars");
            }
        }
        let count = entries.len();
        self.index.replace_all(entries).await;
        info!(documents = count, "rebuilt document index");
        Ok(count)
    }

    /// Remove leftovers of interrupted deletes. Returns how many were removed.
    pub async fn reap_trash(&self) -> StorageResult<usize> {
        let trash = self.trash_root();
        let mut entries = match fs::read_dir(&trash).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(&trash, e)),
        };

        let mut reaped = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::io(&trash, e))? {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let removed = if is_dir {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match removed {
                Ok(()) => reaped += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not reap trash entry"),
            }
        }
        if reaped > 0 {
            info!(reaped, "reaped trash");
        }
        Ok(reaped)
    }
}

#[async_trait]
impl DocumentStore for LocalFileStorage {
    async fn store(&self, doc: NewDocument) -> StorageResult<StoredDocument> {
        check_size(&doc.original_name, doc.bytes.len(), self.max_document_bytes)?;

        // Caller-chosen ids hold their lock until the sidecar is written so
        // two stores of the same id cannot both pass the duplicate check.
        let (id, _guard) = match doc.id {
            Some(id) => {
                let guard = self.locks.lock(&id).await;
                if self.locate(&id).await.is_some() {
                    return Err(StorageError::DuplicateId(id));
                }
                (id, Some(guard))
            }
            None => (new_document_id(), None),
        };

        let dir = self.type_dir(doc.metadata.document_type);
        let mut file_name = generate_file_name(&doc.original_name);
        while fs::try_exists(dir.join(&file_name)).await.map_err(|e| StorageError::io(&dir, e))? {
            file_name = generate_file_name(&doc.original_name);
        }
        let bytes_path = dir.join(&file_name);
        write_atomic(&bytes_path, &doc.bytes).await?;

        let stored = StoredDocument {
            id,
            file_name: file_name.clone(),
            original_name: doc.original_name,
            storage_locator: bytes_path.display().to_string(),
            size: doc.bytes.len() as u64,
            content_type: doc.content_type,
            metadata: doc.metadata,
            uploaded_at: Utc::now(),
            uploaded_by: doc.uploaded_by,
        };

        let sidecar_path = dir.join(sidecar_file_name(&file_name));
        if let Err(e) = write_sidecar(&sidecar_path, &stored).await {
            warn!(id = %stored.id, path = %bytes_path.display(), error = %e, "sidecar write failed, removing bytes");
            let _ = fs::remove_file(&bytes_path).await;
            return Err(e);
        }
        if let Some(relative) = self.relative(&sidecar_path) {
            self.index.insert(&stored.id, &relative).await;
        }

        info!(
            id = %stored.id,
            document_type = %stored.metadata.document_type,
            path = %bytes_path.display(),
            size = stored.size,
            "stored document"
        );
        Ok(stored)
    }

    async fn get_metadata(&self, id: &str) -> StorageResult<Option<StoredDocument>> {
        Ok(self.locate(id).await.map(|(_, doc)| doc))
    }

    async fn get_content(&self, id: &str) -> StorageResult<Option<DocumentContent>> {
        let Some((sidecar_path, document)) = self.locate(id).await else {
            return Ok(None);
        };
        for path in self.byte_paths(&sidecar_path, &document) {
            match fs::read(&path).await {
                Ok(bytes) => return Ok(Some(DocumentContent { bytes, document })),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(id, path = %path.display(), error = %e, "could not read document bytes");
                    return Ok(None);
                }
            }
        }
        warn!(id, locator = %document.storage_locator, "document bytes are missing");
        Ok(None)
    }

    async fn list(&self, filter: &DocumentFilter) -> StorageResult<Vec<StoredDocument>> {
        let types: Vec<DocumentType> = match filter.document_type {
            Some(document_type) => vec![document_type],
            None => DocumentType::ALL.to_vec(),
        };
        let mut docs: Vec<StoredDocument> = self
            .scan(&types)
            .await
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc))
            .collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        let _guard = self.locks.lock(id).await;
        let Some((sidecar_path, document)) = self.locate(id).await else {
            return Ok(false);
        };

        let trash = self.trash_dir_for(id);
        fs::create_dir_all(&trash).await.map_err(|e| StorageError::io(&trash, e))?;

        // Once the sidecar is in the trash the document is no longer visible.
        let sidecar_name = sidecar_path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        fs::rename(&sidecar_path, trash.join(&sidecar_name))
            .await
            .map_err(|e| StorageError::io(&sidecar_path, e))?;
        self.index.remove(id).await;

        let mut moved = false;
        for path in self.byte_paths(&sidecar_path, &document) {
            let Some(name) = path.file_name() else { continue };
            match fs::rename(&path, trash.join(name)).await {
                Ok(()) => {
                    moved = true;
                    break;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(id, path = %path.display(), error = %e, "could not move document bytes to trash");
                    break;
                }
            }
        }
        if !moved {
            warn!(id, locator = %document.storage_locator, "document bytes were not moved to trash");
        }

        if let Err(e) = fs::remove_dir_all(&trash).await {
            warn!(id, path = %trash.display(), error = %e, "trash left for a later reap");
        }
        info!(id, "deleted document");
        Ok(true)
    }

    async fn update_metadata(
        &self,
        id: &str,
        patch: &MetadataPatch,
    ) -> StorageResult<Option<StoredDocument>> {
        let _guard = self.locks.lock(id).await;
        let Some((sidecar_path, mut document)) = self.locate(id).await else {
            return Ok(None);
        };
        patch.apply(&mut document.metadata);
        write_sidecar(&sidecar_path, &document).await?;
        debug!(id, path = %sidecar_path.display(), "updated document metadata");
        Ok(Some(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerdocs_core::DocumentMetadata;

    fn storage(dir: &Path) -> LocalFileStorage {
        LocalFileStorage::new(&LocalStorageConfig::at(dir))
    }

    fn receipt(name: &str) -> NewDocument {
        NewDocument::new(
            b"receipt bytes".to_vec(),
            name,
            "application/pdf",
            DocumentMetadata::new(DocumentType::Receipt, "user-1"),
            "user-1",
        )
    }

    #[tokio::test]
    async fn store_lays_out_bytes_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        let doc = store.store(receipt("Hotel Folio (March).pdf")).await.unwrap();

        assert!(doc.file_name.starts_with("Hotel_Folio_March_"));
        assert!(doc.file_name.ends_with(".pdf"));
        let bytes_path = dir.path().join("receipt").join(&doc.file_name);
        assert_eq!(std::fs::read(&bytes_path).unwrap(), b"receipt bytes");
        assert!(dir.path().join("receipt").join(sidecar_file_name(&doc.file_name)).exists());
        assert!(dir.path().join(INDEX_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn oversized_document_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalStorageConfig { max_document_bytes: 4, ..LocalStorageConfig::at(dir.path()) };
        let store = LocalFileStorage::new(&config);
        let err = store.store(receipt("big.pdf")).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { size: 13, limit: 4, .. }));
        assert!(!dir.path().join("receipt").exists());
    }

    #[tokio::test]
    async fn caller_supplied_id_is_kept_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        let doc = store.store(receipt("a.pdf").with_id("ext-42")).await.unwrap();
        assert_eq!(doc.id, "ext-42");
        let err = store.store(receipt("b.pdf").with_id("ext-42")).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId(id) if id == "ext-42"));
    }

    #[tokio::test]
    async fn corrupt_sidecars_do_not_abort_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        store.store(receipt("good.pdf")).await.unwrap();
        std::fs::write(dir.path().join("receipt/bad.pdf.metadata.json"), b"{oops").unwrap();

        let docs = store.list(&DocumentFilter::all()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].original_name, "good.pdf");
    }

    #[tokio::test]
    async fn update_keeps_bytes_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        let doc = store.store(receipt("a.pdf")).await.unwrap();

        let patch = MetadataPatch { project_id: Some("proj-9".into()), ..Default::default() };
        let updated = store.update_metadata(&doc.id, &patch).await.unwrap().unwrap();
        assert_eq!(updated.metadata.project_id.as_deref(), Some("proj-9"));
        assert_eq!(updated.storage_locator, doc.storage_locator);

        let reread = store.get_metadata(&doc.id).await.unwrap().unwrap();
        assert_eq!(reread.metadata.project_id.as_deref(), Some("proj-9"));
        assert!(store.update_metadata("missing", &patch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn configured_limit_is_capped_at_the_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalStorageConfig { max_document_bytes: 1_000_000_000, ..LocalStorageConfig::at(dir.path()) };
        let store = LocalFileStorage::new(&config);
        assert_eq!(store.max_document_bytes(), MAX_DOCUMENT_BYTES);

        let mut doc = receipt("huge.pdf");
        doc.bytes = vec![0; MAX_DOCUMENT_BYTES as usize + 1];
        let err = store.store(doc).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { limit, .. } if limit == MAX_DOCUMENT_BYTES));
    }

    #[test]
    fn colliding_ids_get_distinct_trash_dirs() {
        let store = storage(Path::new("/srv/docs"));
        let first = store.trash_dir_for("a b");
        let second = store.trash_dir_for("a_b");
        assert_ne!(first, second);
        assert!(first.starts_with("/srv/docs/.trash"));
        assert!(first.file_name().unwrap().to_str().unwrap().starts_with("a_b."));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn update_racing_delete_never_resurrects() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(storage(dir.path()));
        for round in 0..20 {
            let doc = store.store(receipt(&format!("r{round}.pdf"))).await.unwrap();
            let patch = MetadataPatch { project_id: Some("proj".into()), ..Default::default() };

            let updater = {
                let (store, id) = (store.clone(), doc.id.clone());
                tokio::spawn(async move { store.update_metadata(&id, &patch).await })
            };
            let deleter = {
                let (store, id) = (store.clone(), doc.id.clone());
                tokio::spawn(async move { store.delete(&id).await })
            };
            updater.await.unwrap().unwrap();
            assert!(deleter.await.unwrap().unwrap());

            assert!(store.get_metadata(&doc.id).await.unwrap().is_none());
            let sidecar = dir.path().join("receipt").join(sidecar_file_name(&doc.file_name));
            assert!(!sidecar.exists(), "round {round} left a sidecar behind");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_of_one_id_admit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(storage(dir.path()));
        let attempts: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move { store.store(receipt(&format!("dup{n}.pdf")).with_id("ext-7")).await })
            })
            .collect();

        let mut stored = 0;
        let mut duplicates = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(doc) => {
                    assert_eq!(doc.id, "ext-7");
                    stored += 1;
                }
                Err(StorageError::DuplicateId(id)) => {
                    assert_eq!(id, "ext-7");
                    duplicates += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((stored, duplicates), (1, 7));
        assert_eq!(store.list(&DocumentFilter::all()).await.unwrap().len(), 1);
    }
}
