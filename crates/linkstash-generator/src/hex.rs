use crate::Generator;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt::Write;
use tracing::error;

/// Number of random bytes behind every key.
pub const KEY_BYTES: usize = 8;
/// Length of a rendered key.
pub const KEY_LEN: usize = KEY_BYTES * 2;

/// Generates keys from 8 bytes of OS entropy rendered as 16 uppercase hex
/// characters.
///
/// If the entropy source fails, the failure is logged and a zero-filled key
/// is returned instead of aborting the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexKeyGenerator;

impl HexKeyGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Generator for HexKeyGenerator {
    fn generate(&self) -> String {
        key_from_source(&mut OsRng)
    }
}

fn key_from_source<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0_u8; KEY_BYTES];
    if let Err(e) = rng.try_fill_bytes(&mut bytes) {
        error!(error = %e, "entropy source failed, falling back to a zero-filled key");
        bytes = [0_u8; KEY_BYTES];
    }
    encode(&bytes)
}

fn encode(bytes: &[u8; KEY_BYTES]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(KEY_LEN), |mut out, byte| {
            // writing into a String cannot fail
            let _ = write!(out, "{byte:02X}");
            out
        })
}
