//! veilfs-stream: the data plane of the lite format.
//!
//! A [`ByteStream`] is a plain random-access byte store (host file or
//! memory). [`AesGcmCryptStream`] sits on top of one and presents the
//! decrypted view, block by block:
//!
//! ```text
//! [header: 32]
//! [block 0: iv | ciphertext(block_size) | tag]
//! [block 1: iv | ciphertext(<=block_size) | tag]   // only the last block may be short
//! ...
//! ```
//!
//! The byte-granular `read`/`write`/`resize` on arbitrary offsets are
//! provided by the [`BlockAccess`] trait, which handles block alignment,
//! read-modify-write of partial blocks, and boundary rewrites on resize.

pub mod block;
pub mod crypt;
pub mod stream;

pub use block::BlockAccess;
pub use crypt::AesGcmCryptStream;
pub use stream::{ByteStream, HostFile, MemoryStream};
