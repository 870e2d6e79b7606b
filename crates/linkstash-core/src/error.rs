use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("short key not found: {0}")]
    NotFound(String),
    #[error("short key was deleted: {0}")]
    Deleted(String),
    /// Advisory conflict. Carries the key already assigned to the original URL.
    #[error("original url already exists under short key {0}")]
    OriginalUrlAlreadyExists(String),
    #[error("short key already exists: {0}")]
    KeyAlreadyExists(String),
    #[error("operation cancelled by shutdown")]
    Cancelled,
    #[error("deletion pipeline is closed")]
    PipelineClosed,
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage file i/o failed: {0}")]
    Io(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StorageError {
    /// Returns the pre-existing short key when this is a dedup conflict.
    pub fn existing_key(&self) -> Option<&str> {
        match self {
            StorageError::OriginalUrlAlreadyExists(key) => Some(key),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
