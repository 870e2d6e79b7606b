use async_trait::async_trait;
use linkstash_core::{DeletionHandle, PipelineState, Result, StorageError};
use std::collections::HashSet;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Default capacity of a deletion pipeline's key channel.
pub const DEFAULT_DELETION_BUFFER: usize = 64;

/// Backend hook that applies one pipeline's accumulated keys as a single write.
#[async_trait]
pub(crate) trait SoftDelete: Send + Sync + 'static {
    /// Marks every key owned by `user_id` as deleted and returns how many
    /// records flipped. Keys owned by other users are skipped.
    async fn soft_delete(&self, user_id: &str, keys: Vec<String>) -> Result<u64>;
}

/// Opens a pipeline and spawns its worker on `tracker`.
pub(crate) fn open<D: SoftDelete>(
    backend: D,
    user_id: &str,
    tracker: &TaskTracker,
    shutdown: CancellationToken,
    buffer: usize,
) -> DeletionHandle {
    let (keys_tx, keys_rx) = mpsc::channel(buffer.max(1));
    let (state_tx, state_rx) = watch::channel(PipelineState::Open);

    tracker.spawn(run(
        backend,
        user_id.to_string(),
        keys_rx,
        state_tx,
        shutdown,
    ));

    DeletionHandle::new(keys_tx, state_rx)
}

async fn run<D: SoftDelete>(
    backend: D,
    user_id: String,
    mut keys: mpsc::Receiver<String>,
    state: watch::Sender<PipelineState>,
    shutdown: CancellationToken,
) {
    let mut pending = HashSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!(user_id = %user_id, pending = pending.len(), "deletion pipeline cancelled while open");
                state.send_replace(PipelineState::Aborted(StorageError::Cancelled));
                return;
            }
            key = keys.recv() => match key {
                Some(key) => {
                    pending.insert(key);
                }
                None => break,
            },
        }
    }

    state.send_replace(PipelineState::Draining);

    if pending.is_empty() {
        debug!(user_id = %user_id, "deletion pipeline closed without keys");
        state.send_replace(PipelineState::Committed { deleted: 0 });
        return;
    }

    let requested = pending.len();
    let keys: Vec<String> = pending.into_iter().collect();

    let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(StorageError::Cancelled),
        result = backend.soft_delete(&user_id, keys) => result,
    };

    match outcome {
        Ok(deleted) => {
            info!(user_id = %user_id, requested, deleted, "deletion pipeline committed");
            state.send_replace(PipelineState::Committed { deleted });
        }
        Err(e) => {
            error!(user_id = %user_id, requested, error = %e, "deletion pipeline aborted");
            state.send_replace(PipelineState::Aborted(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl SoftDelete for Recorder {
        async fn soft_delete(&self, user_id: &str, mut keys: Vec<String>) -> Result<u64> {
            if self.fail {
                return Err(StorageError::Io("disk full".into()));
            }
            keys.sort();
            let count = keys.len() as u64;
            self.calls.lock().unwrap().push((user_id.to_string(), keys));
            Ok(count)
        }
    }

    #[tokio::test]
    async fn applies_all_keys_once_after_close() {
        let backend = Recorder::default();
        let tracker = TaskTracker::new();
        let handle = open(
            backend.clone(),
            "u1",
            &tracker,
            CancellationToken::new(),
            DEFAULT_DELETION_BUFFER,
        );

        handle.send("B").await.unwrap();
        handle.send("A").await.unwrap();
        handle.send("A").await.unwrap();
        assert!(backend.calls.lock().unwrap().is_empty());

        let state = handle.close().wait().await;
        assert_eq!(state, PipelineState::Committed { deleted: 2 });

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("u1".to_string(), vec!["A".to_string(), "B".to_string()])]);
    }

    #[tokio::test]
    async fn empty_pipeline_commits_without_write() {
        let backend = Recorder::default();
        let tracker = TaskTracker::new();
        let handle = open(backend.clone(), "u1", &tracker, CancellationToken::new(), 1);

        assert_eq!(handle.close().wait().await, PipelineState::Committed { deleted: 0 });
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_aborts() {
        let backend = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let tracker = TaskTracker::new();
        let handle = open(backend, "u1", &tracker, CancellationToken::new(), 1);
        handle.send("A").await.unwrap();

        assert_eq!(
            handle.close().wait().await,
            PipelineState::Aborted(StorageError::Io("disk full".into()))
        );
    }

    #[tokio::test]
    async fn shutdown_aborts_open_pipeline() {
        let backend = Recorder::default();
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let handle = open(backend.clone(), "u1", &tracker, shutdown.clone(), 1);
        handle.send("A").await.unwrap();

        shutdown.cancel();
        tracker.close();
        tracker.wait().await;

        assert_eq!(
            handle.status().current(),
            PipelineState::Aborted(StorageError::Cancelled)
        );
        assert_eq!(handle.send("B").await, Err(StorageError::PipelineClosed));
        assert!(backend.calls.lock().unwrap().is_empty());
    }
}
