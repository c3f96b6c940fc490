use anyhow::{bail, Context, Result};
use ledgerdocs_core::naming::safe_component;
use ledgerdocs_core::{DocumentMetadata, DocumentType, NormalizerConfig, StoredDocument, MAX_DOCUMENT_BYTES};
use ledgerdocs_normalize::{BatchItem, BatchOutcome, ReceiptNormalizer};
use ledgerdocs_storage::{DocumentStore, NewDocument};
use serde::Serialize;
use std::path::Path;
use tracing::info;

pub struct StoreRequest {
    pub document_type: DocumentType,
    pub user: String,
    pub project: Option<String>,
    pub client: Option<String>,
    pub content_type: Option<String>,
    pub id: Option<String>,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Content type from magic bytes, then the file extension for formats
/// without a signature.
pub fn detect_content_type(path: &Path, data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn file_size(file: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    Ok(metadata.len())
}

/// Reads `file` only once its size on disk is within `limit`.
async fn read_within(file: &Path, limit: u64) -> Result<Vec<u8>> {
    let size = file_size(file).await?;
    if size > limit {
        bail!("{} is {size} bytes, exceeding the {limit} byte limit", file.display());
    }
    tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))
}

pub async fn store_file(
    store: &dyn DocumentStore,
    file: &Path,
    request: StoreRequest,
) -> Result<StoredDocument> {
    let bytes = read_within(file, MAX_DOCUMENT_BYTES).await?;
    let content_type = request
        .content_type
        .unwrap_or_else(|| detect_content_type(file, &bytes));

    let mut metadata = DocumentMetadata::new(request.document_type, &request.user);
    metadata.project_id = request.project;
    metadata.client_id = request.client;

    let mut doc = NewDocument::new(bytes, display_name(file), content_type, metadata, request.user);
    doc.id = request.id;
    Ok(store.store(doc).await?)
}

pub async fn get_document(store: &dyn DocumentStore, id: &str, output: Option<&Path>) -> Result<()> {
    match output {
        None => match store.get_metadata(id).await? {
            Some(doc) => print_json(&doc),
            None => bail!("no document with id '{id}'"),
        },
        Some(output) => {
            let Some(content) = store.get_content(id).await? else {
                bail!("no document with id '{id}'");
            };
            tokio::fs::write(output, &content.bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            info!(id, path = %output.display(), size = content.bytes.len(), "wrote document bytes");
            print_json(&content.document)
        }
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/svg+xml" => "svg",
        _ => "png",
    }
}

pub async fn normalize_files(config: &NormalizerConfig, files: &[std::path::PathBuf], output: Option<&Path>) -> Result<()> {
    let limit = config.max_receipt_bytes.min(MAX_DOCUMENT_BYTES);
    let mut items = Vec::with_capacity(files.len());
    let mut oversized = 0;
    for file in files {
        let size = file_size(file).await?;
        if size > limit {
            eprintln!("{}: {size} bytes exceeds the {limit} byte limit", display_name(file));
            oversized += 1;
            continue;
        }
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        let content_type = detect_content_type(file, &data);
        items.push(BatchItem::new(data, content_type, display_name(file)));
    }

    let normalizer = ReceiptNormalizer::new(config.clone());
    let outcomes = normalizer.normalize_batch(items).await;
    let failures = oversized + outcomes.iter().filter(|o| o.is_failed()).count();

    match output {
        None => {
            let report: Vec<serde_json::Value> = outcomes
                .iter()
                .map(|outcome| match outcome {
                    BatchOutcome::Normalized(receipt) => serde_json::to_value(receipt).unwrap_or_default(),
                    BatchOutcome::Failed { index, name, error } => serde_json::json!({
                        "failed": true,
                        "index": index,
                        "originalName": name,
                        "error": error.to_string(),
                    }),
                })
                .collect();
            print_json(&report)?;
        }
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
            for (position, outcome) in outcomes.iter().enumerate() {
                match outcome {
                    BatchOutcome::Normalized(receipt) => {
                        let Some(bytes) = receipt.payload() else { continue };
                        let name = format!(
                            "{position:02}_{}.{}",
                            safe_component(&receipt.original_name),
                            extension_for(&receipt.content_type)
                        );
                        let path = dir.join(name);
                        tokio::fs::write(&path, bytes)
                            .await
                            .with_context(|| format!("writing {}", path.display()))?;
                        match &receipt.conversion_note {
                            Some(note) => println!("{} ({note})", path.display()),
                            None => println!("{}", path.display()),
                        }
                    }
                    BatchOutcome::Failed { name, error, .. } => eprintln!("{name}: {error}"),
                }
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} receipts could not be normalized", files.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerdocs_core::LocalStorageConfig;
    use ledgerdocs_storage::LocalFileStorage;

    #[test]
    fn sniffs_magic_bytes_before_extension() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(detect_content_type(Path::new("misnamed.txt"), png), "image/png");
        assert_eq!(detect_content_type(Path::new("r.pdf"), b"%PDF-1.7"), "application/pdf");
        assert_eq!(detect_content_type(Path::new("notes.TXT"), b"Coffee $4"), "text/plain");
        assert_eq!(detect_content_type(Path::new("blob"), b"\0\x01"), "application/octet-stream");
    }

    #[tokio::test]
    async fn stores_a_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("parking receipt.txt");
        std::fs::write(&file, b"Parking $12").unwrap();
        let store = LocalFileStorage::new(&LocalStorageConfig::at(dir.path().join("docs")));

        let request = StoreRequest {
            document_type: DocumentType::Receipt,
            user: "user-1".into(),
            project: Some("proj-1".into()),
            client: None,
            content_type: None,
            id: None,
        };
        let doc = store_file(&store, &file, request).await.unwrap();
        assert_eq!(doc.original_name, "parking receipt.txt");
        assert_eq!(doc.content_type, "text/plain");
        assert_eq!(doc.metadata.project_id.as_deref(), Some("proj-1"));
        assert!(store.get_content(&doc.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.pdf");
        // Sparse, so the test never holds the bytes either.
        std::fs::File::create(&file).unwrap().set_len(MAX_DOCUMENT_BYTES + 1).unwrap();
        let store = LocalFileStorage::new(&LocalStorageConfig::at(dir.path().join("docs")));

        let request = StoreRequest {
            document_type: DocumentType::Receipt,
            user: "user-1".into(),
            project: None,
            client: None,
            content_type: None,
            id: None,
        };
        let err = store_file(&store, &file, request).await.unwrap_err();
        assert!(err.to_string().contains("exceeding the 26214400 byte limit"), "{err}");
        assert!(store.list(&ledgerdocs_core::DocumentFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_receipts_fail_without_stopping_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("tip.txt");
        let large = dir.path().join("long.txt");
        std::fs::write(&small, b"Tip $3").unwrap();
        std::fs::write(&large, b"far more than sixteen bytes").unwrap();
        let out = dir.path().join("out");
        let config = NormalizerConfig { max_receipt_bytes: 16, ..Default::default() };

        let err = normalize_files(&config, &[large, small], Some(&out)).await.unwrap_err();
        assert!(err.to_string().starts_with("1 of 2 receipts"), "{err}");
        let written: Vec<_> = std::fs::read_dir(&out).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(written.len(), 1);
    }
}
