use linkstash_core::{BatchResult, Result, StorageError, UserUrl};
use tracing::debug;

/// Result of a dedup-checked insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// The record was stored under the submitted key.
    Created,
    /// A live record with the same original URL already exists under this key.
    Existing(String),
}

impl InsertOutcome {
    /// Single inserts report a dedup hit as an error carrying the existing key.
    pub(crate) fn into_set_result(self, short_key: &str) -> Result<String> {
        match self {
            InsertOutcome::Created => Ok(short_key.to_string()),
            InsertOutcome::Existing(existing) => {
                debug!(short_key = %short_key, existing_key = %existing, "original url already stored");
                Err(StorageError::OriginalUrlAlreadyExists(existing))
            }
        }
    }

    /// Batch inserts fold a dedup hit into the result instead.
    pub(crate) fn record(self, result: &mut BatchResult, short_key: String, item: UserUrl) {
        match self {
            InsertOutcome::Created => result.inserted(short_key, item),
            InsertOutcome::Existing(existing) => {
                debug!(short_key = %short_key, existing_key = %existing, "batch item resolved to existing key");
                result.existing(existing, item);
            }
        }
    }
}
