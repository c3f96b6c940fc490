//! Sidecar files: one pretty-printed JSON `StoredDocument` per stored file.

use ledgerdocs_core::naming::is_sidecar_name;
use ledgerdocs_core::StoredDocument;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{StorageError, StorageResult};

/// Write through a uniquely named temp file in the same directory, then
/// rename over the destination.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await.map_err(|e| StorageError::io(parent, e))?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let temp_path = parent.join(format!(".{file_name}.{:08x}.tmp", rand::random::<u32>()));

    let mut file = fs::File::create(&temp_path).await.map_err(|e| StorageError::io(&temp_path, e))?;
    file.write_all(data).await.map_err(|e| StorageError::io(&temp_path, e))?;
    file.sync_all().await.map_err(|e| StorageError::io(&temp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        warn!(from = %temp_path.display(), to = %path.display(), error = %e, "rename failed");
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

pub(crate) async fn write_sidecar(path: &Path, doc: &StoredDocument) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(doc)
        .map_err(|e| StorageError::json(path, e))?;
    write_atomic(path, &json).await
}

pub(crate) async fn read_sidecar(path: &Path) -> StorageResult<StoredDocument> {
    let raw = fs::read(path).await.map_err(|e| StorageError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| StorageError::json(path, e))
}

/// Sidecar paths directly inside `dir`, sorted. A missing directory has none.
pub(crate) async fn sidecars_in(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::io(dir, e))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if is_sidecar_name(name) && !name.starts_with('.') {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/receipt/a.bin");
        write_atomic(&target, b"first").await.unwrap();
        write_atomic(&target, b"second").await.unwrap();

        assert_eq!(fs::read(&target).await.unwrap(), b"second");
        let mut entries = std::fs::read_dir(target.parent().unwrap()).unwrap();
        assert!(entries.all(|e| !e.unwrap().file_name().to_string_lossy().ends_with(".tmp")));
    }

    #[tokio::test]
    async fn missing_directory_has_no_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sidecars_in(&dir.path().join("absent")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_sidecars_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.pdf", "a.pdf.metadata.json", "b.png.metadata.json", "notes.json"] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let found = sidecars_in(dir.path()).await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.pdf.metadata.json", "b.png.metadata.json"]);
    }

    #[tokio::test]
    async fn corrupt_sidecar_error_carries_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pdf.metadata.json");
        std::fs::write(&path, b"{oops").unwrap();
        match read_sidecar(&path).await.unwrap_err() {
            StorageError::Json { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected Json error, got {other:?}"),
        }
    }
}
