//! Core types and traits for the linkstash URL storage engine.
//!
//! This crate provides the record model, the error taxonomy and the storage
//! contract shared by every storage backend and by the shortener service.

pub mod deletion;
pub mod error;
pub mod model;
pub mod storage;

pub use deletion::{DeletionHandle, DeletionStatus, PipelineState};
pub use error::{Result, StorageError};
pub use model::{
    normalize_user_id, BatchResult, Stats, UserUrl, UserUrlEntity, ANONYMOUS_USER_ID,
};
pub use storage::{Pinger, UrlStorage};
