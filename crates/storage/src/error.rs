use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Document '{file_name}' is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge { file_name: String, size: u64, limit: u64 },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid metadata JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Document library returned {status} while {context}")]
    Remote { status: u16, context: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Could not obtain an access token: {0}")]
    Token(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("A document with id '{0}' already exists")]
    DuplicateId(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StorageError::Json { path: path.into(), source }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
