//! URL shortener service built on the linkstash storage engine.
//!
//! [`ShortenerService`] validates input, generates short keys and drives a
//! [`UrlStorage`](linkstash_core::UrlStorage) backend. It also owns the task
//! tracker that deletion pipelines run on, so callers can drain them on
//! shutdown.

pub mod error;
pub mod service;

pub use error::ShortenerError;
pub use service::{PingStatus, Shortened, ShortenerService};
