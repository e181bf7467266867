//! Small byte helpers shared across the format code.

use rand::RngCore;
use veilfs_core::{VeilError, VeilResult};

/// Canonical LSB-first encoding, independent of host endianness.
pub fn to_le_u32(value: u32, out: &mut [u8; 4]) {
    *out = value.to_le_bytes();
}

pub fn from_le_u32(input: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*input)
}

pub fn hexify(data: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(data)
}

pub fn unhexify(text: &str) -> VeilResult<Vec<u8>> {
    data_encoding::HEXLOWER_PERMISSIVE
        .decode(text.as_bytes())
        .map_err(|e| VeilError::InvalidFormat(format!("hex: {e}")))
}

/// Fill `buf` from the process CSPRNG. Empty buffers are a no-op.
pub fn generate_random(buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    rand::thread_rng().fill_bytes(buf);
}

/// Not constant-time; used for format decisions, never for secrets.
pub fn is_all_zeros(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}
