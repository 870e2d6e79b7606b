//! Caller-facing side of an asynchronous soft-deletion pipeline.
//!
//! A storage backend opens a pipeline with
//! [`UrlStorage::delete_user_urls`](crate::UrlStorage::delete_user_urls) and
//! returns a [`DeletionHandle`] right away. The caller feeds short keys into
//! the handle and closes it; the backend's worker applies every received key
//! as one write once the channel is closed.
//!
//! ```text
//! Open --(channel closed)--> Draining --(write ok)--> Committed
//!   |                           |
//!   +--(shutdown)--> Aborted <--+--(write failed / shutdown)
//! ```

use crate::error::{Result, StorageError};
use tokio::sync::{mpsc, watch};
use tokio_util::task::TaskTracker;

/// Lifecycle of one deletion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// The channel is accepting keys.
    Open,
    /// The channel is closed and the accumulated keys are being written.
    Draining,
    /// All soft deletes were applied. `deleted` counts the records that
    /// actually flipped; keys owned by other users are not counted.
    Committed { deleted: u64 },
    /// Shutdown or a backend write error stopped the pipeline.
    Aborted(StorageError),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Committed { .. } | PipelineState::Aborted(_))
    }
}

/// Watches a pipeline until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct DeletionStatus {
    state: watch::Receiver<PipelineState>,
}

impl DeletionStatus {
    pub fn new(state: watch::Receiver<PipelineState>) -> Self {
        Self { state }
    }

    pub fn current(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Resolves once the pipeline is committed or aborted.
    ///
    /// A worker that disappears without reporting a terminal state is
    /// treated as aborted by cancellation.
    pub async fn wait(mut self) -> PipelineState {
        let terminal = self
            .state
            .wait_for(PipelineState::is_terminal)
            .await
            .map(|state| state.clone());

        match terminal {
            Ok(state) => state,
            Err(_) => {
                let last = self.state.borrow().clone();
                if last.is_terminal() {
                    last
                } else {
                    PipelineState::Aborted(StorageError::Cancelled)
                }
            }
        }
    }
}

/// Write side of a deletion pipeline scoped to one user.
///
/// The channel closes when the handle is closed or dropped.
#[derive(Debug)]
pub struct DeletionHandle {
    keys: mpsc::Sender<String>,
    status: DeletionStatus,
}

impl DeletionHandle {
    pub fn new(keys: mpsc::Sender<String>, state: watch::Receiver<PipelineState>) -> Self {
        Self {
            keys,
            status: DeletionStatus::new(state),
        }
    }

    /// Queues one short key for deletion.
    ///
    /// Fails with [`StorageError::PipelineClosed`] when the worker has
    /// already stopped (for example after a shutdown).
    pub async fn send(&self, key: impl Into<String>) -> Result<()> {
        self.keys
            .send(key.into())
            .await
            .map_err(|_| StorageError::PipelineClosed)
    }

    pub fn status(&self) -> DeletionStatus {
        self.status.clone()
    }

    /// Closes this handle's side of the channel.
    pub fn close(self) -> DeletionStatus {
        self.status
    }

    /// Feeds `keys` from a task registered on `tracker`, then closes the
    /// channel. Returns immediately.
    pub fn feed<I>(self, keys: I, tracker: &TaskTracker) -> DeletionStatus
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        let status = self.status();
        let keys = keys.into_iter();

        tracker.spawn(async move {
            for key in keys {
                if self.send(key).await.is_err() {
                    break;
                }
            }
        });

        status
    }
}
