//! veilfs-crypto: cryptographic primitives of the veilfs lite format
//!
//! Content blocks are sealed with AES-GCM under a per-file session key:
//!
//! ```text
//! [iv (iv_size)][ciphertext (block len)][tag (16)]
//! AAD = block index (4 bytes, little-endian)
//! ```
//!
//! The session key is the AES-256-ECB encryption of the file's random
//! 32-byte header under the content key. Path components are encrypted
//! deterministically (synthetic IV derived from the plaintext) and encoded
//! in unpadded base32 so directory lookups stay exact-match.

pub mod base32;
pub mod bytes;
pub mod gcm;
pub mod names;
pub mod session;
pub mod xattr;

pub use gcm::Gcm;
pub use names::NameCodec;
pub use xattr::XattrCodec;

/// Size of a GCM authentication tag.
pub const TAG_SIZE: usize = 16;

/// Size of the synthetic IV prefixed to encrypted names.
pub const SIV_SIZE: usize = 16;

/// Size of the random per-file header (and of the derived session key).
pub const HEADER_SIZE: usize = 32;

/// Accepted per-block IV sizes.
pub const MIN_IV_SIZE: usize = 12;
pub const MAX_IV_SIZE: usize = 32;
