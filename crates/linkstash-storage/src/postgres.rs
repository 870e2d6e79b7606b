use crate::dedup::InsertOutcome;
use crate::pipeline::{self, SoftDelete, DEFAULT_DELETION_BUFFER};
use async_trait::async_trait;
use linkstash_core::{
    normalize_user_id, BatchResult, DeletionHandle, Pinger, Result, Stats, StorageError,
    UrlStorage, UserUrl, UserUrlEntity,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};
use typed_builder::TypedBuilder;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Settings for [`PostgresStore::connect`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresSettings {
    #[builder(setter(into))]
    pub database_url: String,
    #[builder(default = 5)]
    pub max_connections: u32,
    #[builder(default)]
    pub shutdown: CancellationToken,
    #[builder(default = DEFAULT_DELETION_BUFFER)]
    pub deletion_buffer: usize,
}

/// PostgreSQL implementation of [`UrlStorage`].
///
/// Every row lives in the `urls` table. A partial unique index keeps at most
/// one non-deleted row per original URL; soft-deleted rows keep their key
/// forever and are never reused.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    shutdown: CancellationToken,
    deletion_buffer: usize,
}

impl PostgresStore {
    /// Creates a store from an existing pool. The schema must already exist.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            shutdown: CancellationToken::new(),
            deletion_buffer: DEFAULT_DELETION_BUFFER,
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_deletion_buffer(mut self, deletion_buffer: usize) -> Self {
        self.deletion_buffer = deletion_buffer;
        self
    }

    /// Opens a pool, verifies it with a ping and applies pending migrations.
    pub async fn connect(settings: PostgresSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await
            .map_err(map_sqlx_error)?;

        let store = Self::new(pool)
            .with_shutdown(settings.shutdown)
            .with_deletion_buffer(settings.deletion_buffer);

        if let Err(e) = store.ping().await {
            store.close().await;
            return Err(e);
        }
        Self::migrate(&store.pool).await?;

        info!(max_connections = settings.max_connections, "postgres store ready");
        Ok(store)
    }

    /// Applies the embedded migrations to `pool`.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| StorageError::Operation(format!("failed to apply migrations: {e}")))?;
        debug!("migrations applied");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("postgres pool closed");
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn to_count(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StorageError::InvalidData(format!("negative count: {value}")))
}

async fn live_key_for(
    tx: &mut Transaction<'_, Postgres>,
    original_url: &str,
) -> Result<Option<String>> {
    sqlx::query_scalar(
        r#"
        SELECT short_url
        FROM urls
        WHERE original_url = $1
          AND is_deleted = FALSE
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(original_url)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx_error)
}

/// Dedup-checked insert inside `tx`.
///
/// A row inserted concurrently by another transaction makes the insert a
/// no-op through the partial unique index; the winner's key is then read
/// back and reported as the existing key.
async fn insert_deduplicated(
    tx: &mut Transaction<'_, Postgres>,
    short_key: &str,
    record: &UserUrl,
) -> Result<InsertOutcome> {
    if let Some(existing) = live_key_for(tx, &record.original_url).await? {
        return Ok(InsertOutcome::Existing(existing));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO urls (short_url, original_url, user_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (original_url) WHERE is_deleted = FALSE DO NOTHING
        "#,
    )
    .bind(short_key)
    .bind(&record.original_url)
    .bind(&record.user_id)
    .execute(&mut **tx)
    .await;

    match inserted {
        Ok(done) if done.rows_affected() == 1 => {
            debug!(short_key = %short_key, "stored url");
            Ok(InsertOutcome::Created)
        }
        Ok(_) => match live_key_for(tx, &record.original_url).await? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(StorageError::Operation(format!(
                "insert of {short_key} was skipped but no live row holds its url"
            ))),
        },
        Err(err) if is_unique_violation(&err) => {
            error!(short_key = %short_key, "generated short key collides with a stored record");
            Err(StorageError::KeyAlreadyExists(short_key.to_string()))
        }
        Err(err) => Err(map_sqlx_error(err)),
    }
}

#[async_trait]
impl UrlStorage for PostgresStore {
    async fn get_url(&self, short_key: &str) -> Result<String> {
        trace!(short_key = %short_key, "looking up short key");

        let row = sqlx::query(
            r#"
            SELECT original_url, is_deleted
            FROM urls
            WHERE short_url = $1
            "#,
        )
        .bind(short_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(short_key.to_string()));
        };

        let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;
        if is_deleted {
            return Err(StorageError::Deleted(short_key.to_string()));
        }

        row.try_get("original_url").map_err(map_sqlx_error)
    }

    async fn set_url(&self, short_key: &str, original_url: &str, user_id: &str) -> Result<String> {
        let record = UserUrl::new(normalize_user_id(user_id), original_url);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let outcome = insert_deduplicated(&mut tx, short_key, &record).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        outcome.into_set_result(short_key)
    }

    async fn set_url_batch(&self, items: HashMap<String, UserUrl>) -> Result<BatchResult> {
        let mut items: Vec<(String, UserUrl)> = items.into_iter().collect();
        // a stable order keeps concurrent batches from locking rows in opposite orders
        items.sort_by(|a, b| a.0.cmp(&b.0));

        let mut result = BatchResult::with_capacity(items.len());

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for (short_key, item) in items {
            let record = UserUrl::new(normalize_user_id(&item.user_id), item.original_url);
            insert_deduplicated(&mut tx, &short_key, &record)
                .await?
                .record(&mut result, short_key, record);
        }
        tx.commit().await.map_err(map_sqlx_error)?;

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

        let urls: Vec<UserUrlEntity> = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT short_url, original_url
            FROM urls
            WHERE user_id = $1
              AND is_deleted = FALSE
            ORDER BY short_url
            "#,
        )
        .bind(&user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_iter()
        .map(|(short_url, original_url)| UserUrlEntity {
            short_url,
            original_url,
        })
        .collect();

        if urls.is_empty() {
            return Err(StorageError::NotFound(user_id));
        }

        Ok(urls)
    }

    fn delete_user_urls(&self, user_id: &str, tracker: &TaskTracker) -> Result<DeletionHandle> {
        Ok(pipeline::open(
            self.clone(),
            &normalize_user_id(user_id),
            tracker,
            self.shutdown.clone(),
            self.deletion_buffer,
        ))
    }

    async fn get_stats(&self) -> Result<Stats> {
        let (urls, users): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(DISTINCT user_id)
            FROM urls
            WHERE is_deleted = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(Stats {
            urls: to_count(urls)?,
            users: to_count(users)?,
        })
    }

    fn as_pinger(&self) -> Option<&dyn Pinger> {
        Some(self)
    }
}

#[async_trait]
impl SoftDelete for PostgresStore {
    async fn soft_delete(&self, user_id: &str, keys: Vec<String>) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let done = sqlx::query(
            r#"
            UPDATE urls
            SET is_deleted = TRUE
            WHERE user_id = $1
              AND short_url = ANY($2)
              AND is_deleted = FALSE
            "#,
        )
        .bind(user_id)
        .bind(keys)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl Pinger for PostgresStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
