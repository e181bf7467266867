//! Unpadded RFC 4648 base32 (`A..Z2..7`) for encrypted name components.
//!
//! Decoding is strict: symbols outside the alphabet and non-canonical
//! trailing bits are rejected, so every encoded name has exactly one
//! byte-level preimage.

use data_encoding::BASE32_NOPAD;
use veilfs_core::{VeilError, VeilResult};

pub fn encode(data: &[u8]) -> String {
    BASE32_NOPAD.encode(data)
}

pub fn decode(text: &str) -> VeilResult<Vec<u8>> {
    BASE32_NOPAD
        .decode(text.as_bytes())
        .map_err(|e| VeilError::InvalidFormat(format!("base32: {e}")))
}

/// Symbols needed to encode `n` bytes.
pub fn encoded_len(n: usize) -> usize {
    (n * 8).div_ceil(5)
}
