use crate::dedup::InsertOutcome;
use crate::journal::Journal;
use crate::pipeline::{self, SoftDelete, DEFAULT_DELETION_BUFFER};
use async_trait::async_trait;
use dashmap::DashMap;
use linkstash_core::{
    normalize_user_id, BatchResult, DeletionHandle, Result, Stats, StorageError, UrlStorage,
    UserUrl, UserUrlEntity,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};
use typed_builder::TypedBuilder;

/// Settings for [`VolatileStore::open`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct VolatileSettings {
    /// Journal file. Without one the store lives only in memory.
    #[builder(default, setter(strip_option, into))]
    pub file_path: Option<PathBuf>,
    /// Cancelled on process shutdown; open deletion pipelines abort.
    #[builder(default)]
    pub shutdown: CancellationToken,
    /// Capacity of each deletion pipeline's key channel.
    #[builder(default = DEFAULT_DELETION_BUFFER)]
    pub deletion_buffer: usize,
}

#[derive(Debug)]
struct Inner {
    /// Every record ever stored, keyed by short key.
    records: DashMap<String, UserUrl>,
    /// Original URL -> short key, for non-deleted records only.
    live_urls: DashMap<String, String>,
    /// Serializes dedup-check-then-insert and deletion apply.
    write_gate: Mutex<()>,
    journal: Option<Journal>,
    shutdown: CancellationToken,
    deletion_buffer: usize,
}

/// In-memory implementation of [`UrlStorage`] using DashMap.
///
/// Reads go straight to the sharded map and never wait on writers. Writes
/// take a single async gate so the dedup check and the insert are atomic
/// with respect to each other. When a [`Journal`] is attached, every insert
/// is appended to it and every deletion rewrites it.
///
/// Soft deletion is best-effort here: if the journal rewrite fails the
/// pipeline aborts, but the in-memory flips already made stay visible.
#[derive(Debug, Clone)]
pub struct VolatileStore {
    inner: Arc<Inner>,
}

impl VolatileStore {
    /// Creates an empty store without a journal.
    pub fn new() -> Self {
        Self::from_parts(
            HashMap::new(),
            None,
            CancellationToken::new(),
            DEFAULT_DELETION_BUFFER,
        )
    }

    /// Creates a store, replaying the journal first when one is configured.
    pub async fn open(settings: VolatileSettings) -> Result<Self> {
        let (records, journal) = match settings.file_path {
            Some(path) => {
                let journal = Journal::open(path).await?;
                let records = journal.load_all().await?;
                (records, Some(journal))
            }
            None => (HashMap::new(), None),
        };

        info!(
            records = records.len(),
            persistent = journal.is_some(),
            "volatile store ready"
        );

        Ok(Self::from_parts(
            records,
            journal,
            settings.shutdown,
            settings.deletion_buffer,
        ))
    }

    fn from_parts(
        records: HashMap<String, UserUrl>,
        journal: Option<Journal>,
        shutdown: CancellationToken,
        deletion_buffer: usize,
    ) -> Self {
        let mut keys: Vec<&String> = records.keys().collect();
        keys.sort();

        let live_urls: DashMap<String, String> = DashMap::new();
        for key in keys {
            let record = &records[key];
            if record.is_deleted {
                continue;
            }
            if let Some(first) = live_urls.get(&record.original_url) {
                warn!(
                    short_key = %key,
                    existing_key = %first.value(),
                    "duplicate live original url in journal, keeping the first key for dedup"
                );
                continue;
            }
            live_urls.insert(record.original_url.clone(), key.clone());
        }

        Self {
            inner: Arc::new(Inner {
                records: records.into_iter().collect(),
                live_urls,
                write_gate: Mutex::new(()),
                journal,
                shutdown,
                deletion_buffer,
            }),
        }
    }

    /// Number of records held, deleted ones included.
    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Dedup-checked insert. Callers must hold the write gate.
    async fn insert_locked(&self, short_key: &str, record: UserUrl) -> Result<InsertOutcome> {
        if let Some(existing) = self.inner.live_urls.get(&record.original_url) {
            return Ok(InsertOutcome::Existing(existing.value().clone()));
        }

        if self.inner.records.contains_key(short_key) {
            error!(short_key = %short_key, "generated short key collides with a stored record");
            return Err(StorageError::KeyAlreadyExists(short_key.to_string()));
        }

        if let Some(journal) = &self.inner.journal {
            journal.append(short_key, &record).await?;
        }

        self.inner
            .live_urls
            .insert(record.original_url.clone(), short_key.to_string());
        self.inner.records.insert(short_key.to_string(), record);
        debug!(short_key = %short_key, "stored url");

        Ok(InsertOutcome::Created)
    }

    fn snapshot(&self) -> Vec<(String, UserUrl)> {
        let mut records: Vec<(String, UserUrl)> = self
            .inner
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

impl Default for VolatileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlStorage for VolatileStore {
    async fn get_url(&self, short_key: &str) -> Result<String> {
        trace!(short_key = %short_key, "looking up short key");

        let Some(record) = self.inner.records.get(short_key) else {
            return Err(StorageError::NotFound(short_key.to_string()));
        };
        if record.is_deleted {
            return Err(StorageError::Deleted(short_key.to_string()));
        }

        Ok(record.original_url.clone())
    }

    async fn set_url(&self, short_key: &str, original_url: &str, user_id: &str) -> Result<String> {
        let record = UserUrl::new(normalize_user_id(user_id), original_url);

        let _gate = self.inner.write_gate.lock().await;
        self.insert_locked(short_key, record)
            .await?
            .into_set_result(short_key)
    }

    async fn set_url_batch(&self, items: HashMap<String, UserUrl>) -> Result<BatchResult> {
        let mut items: Vec<(String, UserUrl)> = items.into_iter().collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));

        let mut result = BatchResult::with_capacity(items.len());

        let _gate = self.inner.write_gate.lock().await;
        for (short_key, item) in items {
            let record = UserUrl::new(normalize_user_id(&item.user_id), item.original_url);
            self.insert_locked(&short_key, record.clone())
                .await?
                .record(&mut result, short_key, record);
        }

        if result.is_partial() {
            warn!(
                conflicts = result.conflicts.len(),
                "batch contained already stored urls"
            );
        }

        Ok(result)
    }

    async fn get_user_urls(&self, user_id: &str) -> Result<Vec<UserUrlEntity>> {
        let user_id = normalize_user_id(user_id);
        let mut urls: Vec<UserUrlEntity> = self
            .inner
            .records
            .iter()
            .filter(|entry| !entry.is_deleted && entry.is_owned_by(&user_id))
            .map(|entry| UserUrlEntity {
                short_url: entry.key().clone(),
                original_url: entry.original_url.clone(),
            })
            .collect();

        if urls.is_empty() {
            return Err(StorageError::NotFound(user_id));
        }

        urls.sort_by(|a, b| a.short_url.cmp(&b.short_url));
        Ok(urls)
    }

    fn delete_user_urls(&self, user_id: &str, tracker: &TaskTracker) -> Result<DeletionHandle> {
        Ok(pipeline::open(
            self.clone(),
            &normalize_user_id(user_id),
            tracker,
            self.inner.shutdown.clone(),
            self.inner.deletion_buffer,
        ))
    }

    async fn get_stats(&self) -> Result<Stats> {
        let mut urls = 0_u64;
        let mut users = HashSet::new();

        for entry in self.inner.records.iter().filter(|entry| !entry.is_deleted) {
            urls += 1;
            users.insert(entry.user_id.clone());
        }

        Ok(Stats {
            urls,
            users: users.len() as u64,
        })
    }
}

#[async_trait]
impl SoftDelete for VolatileStore {
    async fn soft_delete(&self, user_id: &str, keys: Vec<String>) -> Result<u64> {
        let _gate = self.inner.write_gate.lock().await;

        let mut deleted = 0_u64;
        for key in &keys {
            let Some(mut record) = self.inner.records.get_mut(key) else {
                continue;
            };
            if record.is_deleted {
                continue;
            }
            if !record.is_owned_by(user_id) {
                trace!(short_key = %key, user_id = %user_id, "skipping key owned by another user");
                continue;
            }

            record.is_deleted = true;
            self.inner
                .live_urls
                .remove_if(&record.original_url, |_, live_key| live_key == key);
            deleted += 1;
        }

        if deleted > 0 {
            if let Some(journal) = &self.inner.journal {
                journal.rewrite(&self.snapshot()).await?;
            }
        }

        Ok(deleted)
    }
}
