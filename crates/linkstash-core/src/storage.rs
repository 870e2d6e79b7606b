use crate::deletion::DeletionHandle;
use crate::error::Result;
use crate::model::{BatchResult, Stats, UserUrl, UserUrlEntity};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::task::TaskTracker;

/// The contract every storage backend implements.
///
/// At most one non-deleted record exists per original URL. A short key, once
/// handed out, always maps to the same original URL. Records are never
/// physically removed; soft deletion is terminal.
#[async_trait]
pub trait UrlStorage: Send + Sync + 'static {
    /// Returns the original URL stored under `short_key`.
    ///
    /// Fails with `NotFound` for unknown keys and with `Deleted` for keys
    /// whose record was soft-deleted.
    async fn get_url(&self, short_key: &str) -> Result<String>;

    /// Stores `original_url` under `short_key` unless the URL is already
    /// stored.
    ///
    /// Returns the key the URL now lives under. A dedup hit returns
    /// `Err(OriginalUrlAlreadyExists(existing_key))`; a taken `short_key`
    /// returns `Err(KeyAlreadyExists(short_key))`.
    async fn set_url(&self, short_key: &str, original_url: &str, user_id: &str) -> Result<String>;

    /// Stores many items as one unit, resolving each one independently.
    ///
    /// Duplicates of already stored URLs are substituted with their existing
    /// key and reported through [`BatchResult::advisory`]. Only backend
    /// failures are returned as `Err`.
    async fn set_url_batch(&self, items: HashMap<String, UserUrl>) -> Result<BatchResult>;

    /// Lists a user's non-deleted URLs, ordered by short key.
    ///
    /// Fails with `NotFound` when the user owns no live records.
    async fn get_user_urls(&self, user_id: &str) -> Result<Vec<UserUrlEntity>>;

    /// Opens a deletion pipeline for `user_id` and returns without waiting.
    ///
    /// The worker is spawned on `tracker` so a shutdown can wait for it.
    /// Keys owned by another user are ignored.
    fn delete_user_urls(&self, user_id: &str, tracker: &TaskTracker) -> Result<DeletionHandle>;

    /// Counts non-deleted records and their distinct owners.
    async fn get_stats(&self) -> Result<Stats>;

    /// Capability query for a liveness check.
    ///
    /// `None` means the backend has nothing to ping, which is not an error.
    fn as_pinger(&self) -> Option<&dyn Pinger> {
        None
    }
}

/// Liveness check for backends with an external database.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self) -> Result<()>;
}
