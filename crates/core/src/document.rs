use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Schema marker written into every sidecar. Only ever increases.
pub const METADATA_VERSION: u32 = 1;

/// Absolute ceiling for any uploaded document (25 MiB).
pub const MAX_DOCUMENT_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentType {
    Receipt,
    Invoice,
    Contract,
    StatementOfWork,
    Estimate,
    ChangeOrder,
    Report,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::Receipt,
        DocumentType::Invoice,
        DocumentType::Contract,
        DocumentType::StatementOfWork,
        DocumentType::Estimate,
        DocumentType::ChangeOrder,
        DocumentType::Report,
    ];

    /// Wire name, also used as the storage folder name.
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Receipt => "receipt",
            DocumentType::Invoice => "invoice",
            DocumentType::Contract => "contract",
            DocumentType::StatementOfWork => "statementOfWork",
            DocumentType::Estimate => "estimate",
            DocumentType::ChangeOrder => "changeOrder",
            DocumentType::Report => "report",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(&['_', '-'][..], "").as_str() {
            "receipt" => Ok(DocumentType::Receipt),
            "invoice" => Ok(DocumentType::Invoice),
            "contract" => Ok(DocumentType::Contract),
            "statementofwork" | "sow" => Ok(DocumentType::StatementOfWork),
            "estimate" => Ok(DocumentType::Estimate),
            "changeorder" => Ok(DocumentType::ChangeOrder),
            "report" => Ok(DocumentType::Report),
            _ => Err(format!("Unknown document type: '{s}'")),
        }
    }
}

fn current_metadata_version() -> u32 {
    METADATA_VERSION
}

/// Classification carried alongside every stored document.
///
/// Every field except `document_type` tolerates being absent so sidecars
/// written by older or newer schema versions still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub document_type: DocumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_code: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "flexible_date::deserialize"
    )]
    pub effective_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_by_user_id: String,
    #[serde(default = "current_metadata_version")]
    pub metadata_version: u32,
}

impl DocumentMetadata {
    pub fn new(document_type: DocumentType, created_by_user_id: &str) -> Self {
        DocumentMetadata {
            document_type,
            client_id: None,
            client_name: None,
            project_id: None,
            project_code: None,
            effective_date: None,
            amount: None,
            estimate_id: None,
            change_order_id: None,
            tags: Vec::new(),
            created_by_user_id: created_by_user_id.to_string(),
            metadata_version: METADATA_VERSION,
        }
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    pub fn with_client(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }
}

/// Accepts either `YYYY-MM-DD` or a full RFC 3339 timestamp.
mod flexible_date {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => {
                if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    return Ok(Some(date));
                }
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| Some(dt.date_naive()))
                    .map_err(serde::de::Error::custom)
            }
        }
    }
}

/// A persisted document as recorded in its metadata sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    /// Sanitized, collision-resistant name the bytes are stored under.
    pub file_name: String,
    pub original_name: String,
    /// Local path or remote URL of the bytes.
    pub storage_locator: String,
    pub size: u64,
    pub content_type: String,
    pub metadata: DocumentMetadata,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
}

/// Partial metadata update. Present fields overwrite; the document type is
/// fixed at creation because the bytes never move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataPatch {
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub project_id: Option<String>,
    pub project_code: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub estimate_id: Option<String>,
    pub change_order_id: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl MetadataPatch {
    pub fn apply(&self, metadata: &mut DocumentMetadata) {
        fn merge<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        merge(&mut metadata.client_id, &self.client_id);
        merge(&mut metadata.client_name, &self.client_name);
        merge(&mut metadata.project_id, &self.project_id);
        merge(&mut metadata.project_code, &self.project_code);
        merge(&mut metadata.effective_date, &self.effective_date);
        merge(&mut metadata.amount, &self.amount);
        merge(&mut metadata.estimate_id, &self.estimate_id);
        merge(&mut metadata.change_order_id, &self.change_order_id);
        if let Some(tags) = &self.tags {
            metadata.tags = tags.clone();
        }
        metadata.metadata_version = metadata.metadata_version.max(METADATA_VERSION);
    }
}

/// `document_type` narrows what gets scanned; the rest are post-scan predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentFilter {
    pub document_type: Option<DocumentType>,
    pub project_id: Option<String>,
    pub client_id: Option<String>,
    pub uploaded_by: Option<String>,
}

impl DocumentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_type(document_type: DocumentType) -> Self {
        DocumentFilter { document_type: Some(document_type), ..Self::default() }
    }

    pub fn for_project(project_id: &str) -> Self {
        DocumentFilter { project_id: Some(project_id.to_string()), ..Self::default() }
    }

    pub fn matches(&self, doc: &StoredDocument) -> bool {
        fn eq(want: &Option<String>, have: Option<&String>) -> bool {
            want.as_ref().map_or(true, |w| have == Some(w))
        }

        self.document_type.map_or(true, |t| doc.metadata.document_type == t)
            && eq(&self.project_id, doc.metadata.project_id.as_ref())
            && eq(&self.client_id, doc.metadata.client_id.as_ref())
            && eq(&self.uploaded_by, Some(&doc.uploaded_by))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    pub count: usize,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_files: usize,
    pub total_size: u64,
    pub by_document_type: BTreeMap<DocumentType, TypeStats>,
}

impl StorageStats {
    pub fn from_documents(docs: &[StoredDocument]) -> Self {
        let mut stats = StorageStats::default();
        for doc in docs {
            stats.total_files += 1;
            stats.total_size += doc.size;
            let entry = stats.by_document_type.entry(doc.metadata.document_type).or_default();
            entry.count += 1;
            entry.size += doc.size;
        }
        stats
    }
}

/// Newest upload first.
pub fn sort_newest_first(docs: &mut [StoredDocument]) {
    docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn sample(id: &str, document_type: DocumentType, project: Option<&str>) -> StoredDocument {
        let mut metadata = DocumentMetadata::new(document_type, "user-1");
        metadata.project_id = project.map(str::to_string);
        StoredDocument {
            id: id.to_string(),
            file_name: format!("{id}.pdf"),
            original_name: format!("{id}.pdf"),
            storage_locator: format!("/tmp/{id}.pdf"),
            size: 10,
            content_type: "application/pdf".to_string(),
            metadata,
            uploaded_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            uploaded_by: "user-1".to_string(),
        }
    }

    #[test]
    fn document_type_roundtrip() {
        for t in DocumentType::ALL {
            assert_eq!(DocumentType::from_str(t.as_str()).unwrap(), t);
        }
        assert_eq!(DocumentType::from_str("statement_of_work").unwrap(), DocumentType::StatementOfWork);
        assert!(DocumentType::from_str("memo").is_err());
    }

    #[test]
    fn document_type_serializes_camel_case() {
        let json = serde_json::to_string(&DocumentType::ChangeOrder).unwrap();
        assert_eq!(json, "\"changeOrder\"");
    }

    #[test]
    fn metadata_tolerates_missing_and_unknown_fields() {
        let json = r#"{"documentType":"receipt","futureField":{"nested":true}}"#;
        let meta: DocumentMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.document_type, DocumentType::Receipt);
        assert_eq!(meta.metadata_version, METADATA_VERSION);
        assert!(meta.tags.is_empty());
        assert_eq!(meta.created_by_user_id, "");
    }

    #[test]
    fn effective_date_accepts_timestamps() {
        let json = r#"{"documentType":"invoice","effectiveDate":"2024-05-06T00:00:00.000Z"}"#;
        let meta: DocumentMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.effective_date, NaiveDate::from_ymd_opt(2024, 5, 6));
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut meta = DocumentMetadata::new(DocumentType::Receipt, "u").with_project("p-1");
        meta.metadata_version = 3;
        let patch = MetadataPatch {
            client_name: Some("Acme".into()),
            tags: Some(vec!["travel".into()]),
            ..Default::default()
        };
        patch.apply(&mut meta);
        assert_eq!(meta.project_id.as_deref(), Some("p-1"));
        assert_eq!(meta.client_name.as_deref(), Some("Acme"));
        assert_eq!(meta.tags, vec!["travel".to_string()]);
        // Never decreases.
        assert_eq!(meta.metadata_version, 3);
    }

    #[test]
    fn filter_predicates() {
        let doc = sample("a", DocumentType::Receipt, Some("p-1"));
        assert!(DocumentFilter::all().matches(&doc));
        assert!(DocumentFilter::for_project("p-1").matches(&doc));
        assert!(!DocumentFilter::for_project("p-2").matches(&doc));
        assert!(!DocumentFilter::for_type(DocumentType::Contract).matches(&doc));
    }

    #[test]
    fn stats_group_by_type() {
        let docs = vec![
            sample("a", DocumentType::Receipt, None),
            sample("b", DocumentType::Receipt, None),
            sample("c", DocumentType::Report, None),
        ];
        let stats = StorageStats::from_documents(&docs);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_size, 30);
        assert_eq!(stats.by_document_type[&DocumentType::Receipt].count, 2);
        assert_eq!(stats.by_document_type[&DocumentType::Report].size, 10);
    }

    #[test]
    fn stored_document_json_shape() {
        let value = serde_json::to_value(sample("a", DocumentType::StatementOfWork, Some("p"))).unwrap();
        assert_eq!(value["fileName"], "a.pdf");
        assert_eq!(value["storageLocator"], "/tmp/a.pdf");
        assert_eq!(value["uploadedAt"], "2024-03-01T12:00:00Z");
        assert_eq!(value["metadata"]["documentType"], "statementOfWork");
        assert_eq!(value["metadata"]["metadataVersion"], 1);
    }
}
