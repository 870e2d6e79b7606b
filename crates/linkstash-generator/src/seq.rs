use crate::Generator;
use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic key generator using a sequential counter.
///
/// Produces `"{prefix}000000"`, `"{prefix}000001"`, ... Keys are unique
/// within one instance only, so this is meant for tests and local runs.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
        }
    }
}

impl SeqGenerator {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Starts the counter at `offset`, e.g. to resume after a restart.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
            prefix: prefix.into(),
        }
    }
}

impl Generator for SeqGenerator {
    fn generate(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}{:06}", self.prefix, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_sequential_keys() {
        let generator = SeqGenerator::with_prefix("LS");

        assert_eq!(generator.generate(), "LS000000");
        assert_eq!(generator.generate(), "LS000001");
        assert_eq!(generator.generate(), "LS000002");
    }

    #[test]
    fn with_offset() {
        let generator = SeqGenerator::with_offset("LS", 1000);

        assert_eq!(generator.generate(), "LS001000");
        assert_eq!(generator.generate(), "LS001001");
    }

    #[test]
    fn clone_preserves_counter_state() {
        let generator = SeqGenerator::with_prefix("LS");
        generator.generate();
        generator.generate();

        let cloned = generator.clone();

        assert_eq!(generator.generate(), "LS000002");
        assert_eq!(cloned.generate(), "LS000002");
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SeqGenerator>();
    }
}
