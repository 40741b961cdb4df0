//! Payload masking (RFC 6455 Section 5.3) and masking-key generation.

use crate::error::{Error, Result};

/// XOR `data` with the repeating 4-byte `key`.
///
/// Applying the same key twice restores the input. Works eight bytes at a
/// time; the key pattern repeats every four bytes so the widened key is
/// just the key written twice.
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    let wide = u64::from_ne_bytes([
        key[0], key[1], key[2], key[3], key[0], key[1], key[2], key[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ wide;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Source of masking keys for the client role.
///
/// Draws OS randomness in batches so a busy leg does not hit the OS
/// random source for every frame.
#[derive(Debug)]
pub struct MaskGenerator {
    pool: [u8; 256],
    pos: usize,
}

impl MaskGenerator {
    /// Create a generator with an empty pool; the first key refills it.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pool: [0; 256],
            pos: 256,
        }
    }

    /// Next unpredictable masking key.
    ///
    /// # Errors
    ///
    /// `Error::Transport` if the OS random source is unavailable.
    pub fn next_key(&mut self) -> Result<[u8; 4]> {
        if self.pos + 4 > self.pool.len() {
            getrandom::getrandom(&mut self.pool)
                .map_err(|e| Error::Transport(format!("random source: {e}")))?;
            self.pos = 0;
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&self.pool[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(key)
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}
