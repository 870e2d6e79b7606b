use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Owner id recorded for anonymous writes (the nil UUID).
pub const ANONYMOUS_USER_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Maps an empty user id to [`ANONYMOUS_USER_ID`]. Any other value is kept as is.
pub fn normalize_user_id(user_id: &str) -> String {
    if user_id.is_empty() {
        Uuid::nil().to_string()
    } else {
        user_id.to_string()
    }
}

/// One shortening record, keyed externally by its short key.
///
/// `user_id` is fixed at creation. `is_deleted` only ever moves from
/// `false` to `true`, and only through a deletion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub user_id: String,
    pub original_url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_deleted: bool,
}

impl UserUrl {
    pub fn new(user_id: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            original_url: original_url.into(),
            is_deleted: false,
        }
    }

    /// Whether a deletion pipeline opened for `user_id` may delete this record.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// A `(short_url, original_url)` pair returned when listing a user's URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrlEntity {
    pub short_url: String,
    pub original_url: String,
}

/// Aggregate counts over non-deleted records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub urls: u64,
    pub users: u64,
}

/// Outcome of a batch insert.
///
/// Every submitted item appears in `entries`, keyed by the short key it
/// resolved to: its own key when inserted, the pre-existing key when its
/// original URL was already stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub entries: HashMap<String, UserUrl>,
    /// Pre-existing keys that were substituted for submitted ones.
    pub conflicts: Vec<String>,
}

impl BatchResult {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            conflicts: Vec::new(),
        }
    }

    pub fn inserted(&mut self, short_key: String, item: UserUrl) {
        self.entries.insert(short_key, item);
    }

    pub fn existing(&mut self, existing_key: String, item: UserUrl) {
        self.conflicts.push(existing_key.clone());
        self.entries.insert(existing_key, item);
    }

    pub fn is_partial(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// The non-fatal conflict to report alongside the entries, if any item
    /// collided with an already stored URL.
    pub fn advisory(&self) -> Option<StorageError> {
        self.conflicts
            .first()
            .map(|key| StorageError::OriginalUrlAlreadyExists(key.clone()))
    }
}
