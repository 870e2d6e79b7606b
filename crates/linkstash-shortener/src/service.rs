use crate::error::ShortenerError;
use linkstash_core::{
    BatchResult, DeletionStatus, Stats, StorageError, UrlStorage, UserUrl, UserUrlEntity,
};
use linkstash_generator::Generator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// How many fresh keys `shorten` tries before giving up on key collisions.
pub const MAX_KEY_ATTEMPTS: usize = 3;

/// Outcome of shortening one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    /// A new record was stored under this key.
    Created(String),
    /// The URL was already stored; this is its existing key.
    Existing(String),
}

impl Shortened {
    pub fn key(&self) -> &str {
        match self {
            Shortened::Created(key) | Shortened::Existing(key) => key,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Shortened::Created(_))
    }
}

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    Healthy,
    /// The backend has no external dependency to check.
    Unsupported,
}

/// Shortening front end over a storage backend and a key generator.
///
/// Deletion pipelines and their feeders run on the service's own
/// [`TaskTracker`]; call [`ShortenerService::shutdown`] before exiting so
/// accepted deletions are committed or aborted rather than dropped.
#[derive(Debug)]
pub struct ShortenerService<S, G> {
    storage: Arc<S>,
    generator: Arc<G>,
    tracker: TaskTracker,
}

impl<S, G> Clone for ShortenerService<S, G> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            generator: Arc::clone(&self.generator),
            tracker: self.tracker.clone(),
        }
    }
}

impl<S: UrlStorage, G: Generator> ShortenerService<S, G> {
    pub fn new(storage: S, generator: G) -> Self {
        Self {
            storage: Arc::new(storage),
            generator: Arc::new(generator),
            tracker: TaskTracker::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Validates that the URL has an http(s) scheme and a host.
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {url}"
            )));
        };

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if scheme.is_empty() || host.is_empty() {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {url}"
            )));
        }

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {scheme}"
            )));
        }

        Ok(())
    }

    /// Shortens one URL for `user_id` (empty means anonymous).
    ///
    /// A URL that is already stored resolves to its existing key. A generated
    /// key that is already taken is replaced, up to [`MAX_KEY_ATTEMPTS`] keys.
    pub async fn shorten(
        &self,
        original_url: &str,
        user_id: &str,
    ) -> Result<Shortened, ShortenerError> {
        Self::validate_url(original_url)?;

        let mut attempt = 1;
        loop {
            let short_key = self.generator.generate();

            match self.storage.set_url(&short_key, original_url, user_id).await {
                Ok(key) => return Ok(Shortened::Created(key)),
                Err(StorageError::OriginalUrlAlreadyExists(existing)) => {
                    return Ok(Shortened::Existing(existing))
                }
                Err(StorageError::KeyAlreadyExists(key)) if attempt < MAX_KEY_ATTEMPTS => {
                    warn!(short_key = %key, attempt, "short key taken, generating another");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Shortens many URLs in one storage call, one generated key per URL.
    ///
    /// Already stored URLs come back under their existing keys and are
    /// listed in [`BatchResult::conflicts`]. A key collision fails the call
    /// without retry; a volatile backend keeps the items stored before it.
    pub async fn shorten_batch<I>(
        &self,
        urls: I,
        user_id: &str,
    ) -> Result<BatchResult, ShortenerError>
    where
        I: IntoIterator<Item = String>,
    {
        let urls: Vec<String> = urls.into_iter().collect();
        for url in &urls {
            Self::validate_url(url)?;
        }

        let mut items = HashMap::with_capacity(urls.len());
        for url in urls {
            let mut short_key = self.generator.generate();
            while items.contains_key(&short_key) {
                short_key = self.generator.generate();
            }
            items.insert(short_key, UserUrl::new(user_id, url));
        }

        let result = self.storage.set_url_batch(items).await?;
        debug!(
            stored = result.entries.len(),
            conflicts = result.conflicts.len(),
            "batch shortened"
        );
        Ok(result)
    }

    pub async fn resolve(&self, short_key: &str) -> Result<String, ShortenerError> {
        Ok(self.storage.get_url(short_key).await?)
    }

    pub async fn user_urls(&self, user_id: &str) -> Result<Vec<UserUrlEntity>, ShortenerError> {
        Ok(self.storage.get_user_urls(user_id).await?)
    }

    pub async fn stats(&self) -> Result<Stats, ShortenerError> {
        Ok(self.storage.get_stats().await?)
    }

    /// Queues `keys` for soft deletion on behalf of `user_id` and returns
    /// without waiting. Keys owned by someone else are ignored.
    pub fn delete_user_urls(
        &self,
        user_id: &str,
        keys: Vec<String>,
    ) -> Result<DeletionStatus, ShortenerError> {
        let requested = keys.len();
        let handle = self.storage.delete_user_urls(user_id, &self.tracker)?;
        let status = handle.feed(keys, &self.tracker);

        debug!(user_id = %user_id, requested, "deletion queued");
        Ok(status)
    }

    pub async fn ping(&self) -> Result<PingStatus, ShortenerError> {
        match self.storage.as_pinger() {
            Some(pinger) => {
                pinger.ping().await?;
                Ok(PingStatus::Healthy)
            }
            None => Ok(PingStatus::Unsupported),
        }
    }

    /// Closes the tracker and waits until every pipeline started on it has
    /// committed or aborted.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(pending = self.tracker.len(), "draining background tasks");
        self.tracker.wait().await;
        info!("background tasks drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkstash_core::PipelineState;
    use linkstash_generator::SeqGenerator;
    use linkstash_storage::VolatileStore;

    fn test_service() -> ShortenerService<VolatileStore, SeqGenerator> {
        ShortenerService::new(VolatileStore::new(), SeqGenerator::with_prefix("LS"))
    }

    struct FixedGenerator;

    impl Generator for FixedGenerator {
        fn generate(&self) -> String {
            "FIXED".to_string()
        }
    }

    #[tokio::test]
    async fn shorten_with_generated_key() {
        let service = test_service();

        let shortened = service.shorten("https://example.com", "u1").await.unwrap();

        assert_eq!(shortened, Shortened::Created("LS000000".into()));
        assert_eq!(
            service.resolve("LS000000").await.unwrap(),
            "https://example.com"
        );
    }

    #[tokio::test]
    async fn shorten_twice_returns_existing_key() {
        let service = test_service();

        let first = service.shorten("https://example.com", "u1").await.unwrap();
        let second = service.shorten("https://example.com", "u2").await.unwrap();

        assert!(first.is_created());
        assert_eq!(second, Shortened::Existing(first.key().to_string()));
    }

    #[tokio::test]
    async fn shorten_with_invalid_url_fails() {
        let service = test_service();

        for url in ["", "not-a-valid-url", "ftp://example.com", "https://", "://host"] {
            let err = service.shorten(url, "u1").await.unwrap_err();
            assert!(matches!(err, ShortenerError::InvalidUrl(_)), "{url}");
        }
        assert_eq!(service.storage().len(), 0);
    }

    #[tokio::test]
    async fn taken_key_is_regenerated() {
        let service = test_service();
        service
            .storage()
            .set_url("LS000000", "https://taken.example", "u0")
            .await
            .unwrap();

        let shortened = service.shorten("https://example.com", "u1").await.unwrap();

        assert_eq!(shortened, Shortened::Created("LS000001".into()));
    }

    #[tokio::test]
    async fn gives_up_after_repeated_key_collisions() {
        let service = ShortenerService::new(VolatileStore::new(), FixedGenerator);
        service.shorten("https://one.example", "u1").await.unwrap();

        let err = service
            .shorten("https://two.example", "u1")
            .await
            .unwrap_err();

        assert_eq!(
            err.storage(),
            Some(&StorageError::KeyAlreadyExists("FIXED".into()))
        );
    }

    #[tokio::test]
    async fn batch_reports_existing_urls() {
        let service = test_service();
        let existing = service.shorten("https://two.example", "u1").await.unwrap();

        let result = service
            .shorten_batch(
                vec![
                    "https://one.example".to_string(),
                    "https://two.example".to_string(),
                ],
                "u1",
            )
            .await
            .unwrap();

        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.conflicts, vec![existing.key().to_string()]);
    }

    #[tokio::test]
    async fn batch_rejects_invalid_url_before_storing() {
        let service = test_service();

        let err = service
            .shorten_batch(
                vec!["https://ok.example".to_string(), "bad".to_string()],
                "u1",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
        assert!(service.storage().is_empty());
    }

    #[tokio::test]
    async fn resolve_missing_key() {
        let service = test_service();

        let err = service.resolve("nope").await.unwrap_err();
        assert_eq!(err, ShortenerError::Storage(StorageError::NotFound("nope".into())));
    }

    #[tokio::test]
    async fn delete_user_urls_in_background() {
        let service = test_service();
        let a = service.shorten("https://a.example", "u1").await.unwrap();
        let b = service.shorten("https://b.example", "u1").await.unwrap();

        let status = service
            .delete_user_urls("u1", vec![a.key().to_string()])
            .unwrap();

        assert_eq!(status.wait().await, PipelineState::Committed { deleted: 1 });
        assert!(matches!(
            service.resolve(a.key()).await,
            Err(ShortenerError::Storage(StorageError::Deleted(_)))
        ));
        let urls = service.user_urls("u1").await.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].short_url, b.key());
        assert_eq!(service.stats().await.unwrap(), Stats { urls: 1, users: 1 });
    }

    #[tokio::test]
    async fn shutdown_drains_pending_deletions() {
        let service = test_service();
        let a = service.shorten("https://a.example", "u1").await.unwrap();

        let status = service
            .delete_user_urls("u1", vec![a.key().to_string()])
            .unwrap();
        service.shutdown().await;

        assert_eq!(status.current(), PipelineState::Committed { deleted: 1 });
    }

    #[tokio::test]
    async fn ping_without_database_is_unsupported() {
        let service = test_service();

        assert_eq!(service.ping().await.unwrap(), PingStatus::Unsupported);
    }
}
