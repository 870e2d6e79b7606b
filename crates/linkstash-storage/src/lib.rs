//! Storage backends for the linkstash URL storage engine.
//!
//! Two interchangeable implementations of [`UrlStorage`]:
//!
//! - [`VolatileStore`]: a concurrent in-memory map, optionally mirrored to an
//!   append-only [`Journal`] file that is replayed on start.
//! - [`PostgresStore`]: a transactional PostgreSQL backend that also offers
//!   the [`Pinger`] capability.

mod dedup;
pub mod journal;
pub mod memory;
mod pipeline;
pub mod postgres;

pub use journal::Journal;
pub use memory::{VolatileSettings, VolatileStore};
pub use pipeline::DEFAULT_DELETION_BUFFER;
pub use postgres::{PostgresSettings, PostgresStore};

pub use linkstash_core::{
    BatchResult, DeletionHandle, DeletionStatus, Pinger, PipelineState, Result, Stats,
    StorageError, UrlStorage, UserUrl, UserUrlEntity,
};
