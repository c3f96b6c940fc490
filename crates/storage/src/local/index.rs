//! Persisted id → sidecar path index.
//!
//! The sidecars stay the record of truth; this file only saves the full
//! scan on lookups and can always be rebuilt from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::sidecar::write_atomic;

pub const INDEX_FILE_NAME: &str = ".index.json";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    /// id → sidecar path relative to the storage root, `/`-separated.
    entries: BTreeMap<String, String>,
}

pub(crate) struct IdIndex {
    path: PathBuf,
    state: Mutex<Option<IndexFile>>,
}

impl IdIndex {
    pub(crate) fn new(root: &Path) -> Self {
        Self { path: root.join(INDEX_FILE_NAME), state: Mutex::new(None) }
    }

    pub(crate) async fn lookup(&self, id: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        self.loaded(&mut state).await.entries.get(id).cloned()
    }

    pub(crate) async fn insert(&self, id: &str, relative: &str) {
        let mut state = self.state.lock().await;
        let index = self.loaded(&mut state).await;
        index.entries.insert(id.to_string(), relative.to_string());
        self.persist(index).await;
    }

    pub(crate) async fn remove(&self, id: &str) {
        let mut state = self.state.lock().await;
        let index = self.loaded(&mut state).await;
        if index.entries.remove(id).is_some() {
            self.persist(index).await;
        }
    }

    pub(crate) async fn replace_all(&self, entries: BTreeMap<String, String>) {
        let mut state = self.state.lock().await;
        let index = state.insert(IndexFile { version: INDEX_VERSION, entries });
        self.persist(index).await;
    }

    async fn loaded<'a>(&self, state: &'a mut Option<IndexFile>) -> &'a mut IndexFile {
        if state.is_none() {
            *state = Some(self.read().await);
        }
        state.get_or_insert_with(IndexFile::default)
    }

    async fn read(&self) -> IndexFile {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return IndexFile { version: INDEX_VERSION, entries: BTreeMap::new() };
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read document index, starting empty");
                return IndexFile { version: INDEX_VERSION, entries: BTreeMap::new() };
            }
        };
        match serde_json::from_slice::<IndexFile>(&raw) {
            Ok(index) => {
                debug!(path = %self.path.display(), entries = index.entries.len(), "loaded document index");
                index
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt document index, starting empty");
                IndexFile { version: INDEX_VERSION, entries: BTreeMap::new() }
            }
        }
    }

    /// Failures are logged only; a stale or missing index is repaired by the
    /// next scan.
    async fn persist(&self, index: &IndexFile) {
        let json = match serde_json::to_vec_pretty(index) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "could not serialize document index");
                return;
            }
        };
        if let Err(e) = write_atomic(&self.path, &json).await {
            warn!(path = %self.path.display(), error = %e, "could not persist document index");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let index = IdIndex::new(dir.path());
        index.insert("doc-1", "receipt/a.pdf.metadata.json").await;
        index.insert("doc-2", "invoice/b.pdf.metadata.json").await;
        index.remove("doc-2").await;

        let reloaded = IdIndex::new(dir.path());
        assert_eq!(
            reloaded.lookup("doc-1").await.as_deref(),
            Some("receipt/a.pdf.metadata.json")
        );
        assert!(reloaded.lookup("doc-2").await.is_none());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(INDEX_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
    }

    #[tokio::test]
    async fn corrupt_index_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE_NAME), b"{not json").unwrap();
        let index = IdIndex::new(dir.path());
        assert_eq!(index.lookup("anything").await, None);
        index.insert("doc-1", "receipt/a.metadata.json").await;
        assert!(IdIndex::new(dir.path()).lookup("doc-1").await.is_some());
    }
}
