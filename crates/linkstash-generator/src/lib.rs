pub mod hex;
pub mod seq;

pub use hex::HexKeyGenerator;
pub use seq::SeqGenerator;

/// Trait for generating short keys.
///
/// Implementations are pure generators that don't interact with storage.
/// The storage engine never invents keys itself; callers generate one per
/// new mapping and hand it to the engine.
pub trait Generator: Send + Sync + 'static {
    /// Generates a new short key.
    ///
    /// Keys should be unique, but a collision is reported by the storage
    /// engine rather than prevented here.
    fn generate(&self) -> String;
}
