use linkstash_core::StorageError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ShortenerError {
    /// The storage error behind this failure, if any.
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            ShortenerError::Storage(e) => Some(e),
            ShortenerError::InvalidUrl(_) => None,
        }
    }
}
