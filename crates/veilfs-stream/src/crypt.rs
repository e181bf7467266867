//! The AES-GCM crypt stream: the lite format's content encryption.

use std::sync::Arc;

use tracing::warn;
use veilfs_core::{VeilError, VeilResult};
use veilfs_crypto::bytes::{generate_random, is_all_zeros, to_le_u32};
use veilfs_crypto::gcm::Gcm;
use veilfs_crypto::session::derive_session_key;
use veilfs_crypto::{HEADER_SIZE, MAX_IV_SIZE, MIN_IV_SIZE, TAG_SIZE};
use zeroize::Zeroize;

use crate::block::BlockAccess;
use crate::stream::ByteStream;

/// Block indices are bound as a little-endian u32; the format tops out
/// just below 2^31 blocks.
pub const MAX_BLOCKS: u64 = (1 << 31) - 1;

/// Decrypting view over an underlying ciphertext stream.
///
/// Construction reads the 32-byte header at underlying offset 0 (creating
/// and flushing a fresh random one when the stream is empty) and derives
/// the session key from it. Each block is laid out as
/// `iv || ciphertext || tag` with the block index as associated data; an
/// all-zero underlying block is a sparse hole of plaintext zeros.
pub struct AesGcmCryptStream {
    inner: Arc<dyn ByteStream>,
    gcm: Gcm,
    block_size: usize,
    iv_size: usize,
    check: bool,
    scratch: Vec<u8>,
}

impl AesGcmCryptStream {
    /// `check=false` accepts blocks that fail authentication and returns
    /// the raw decryption; salvage tooling only.
    pub fn new(
        inner: Arc<dyn ByteStream>,
        content_key: &[u8; 32],
        block_size: u32,
        iv_size: u32,
        check: bool,
    ) -> VeilResult<Self> {
        if block_size < 32 {
            return Err(VeilError::InvalidArgument(format!(
                "block size {block_size} too small"
            )));
        }
        let iv_size = iv_size as usize;
        if !(MIN_IV_SIZE..=MAX_IV_SIZE).contains(&iv_size) {
            return Err(VeilError::InvalidArgument(format!(
                "IV size {iv_size} out of range {MIN_IV_SIZE}..={MAX_IV_SIZE}"
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        let got = inner.read_at(0, &mut header)?;
        if got == 0 {
            generate_random(&mut header);
            inner.write_at(0, &header)?;
        } else if got != HEADER_SIZE {
            return Err(VeilError::InvalidArgument(
                "underlying stream has an invalid header size".into(),
            ));
        }

        let mut session_key = derive_session_key(content_key, &header)?;
        let gcm = Gcm::new(&session_key)?;
        session_key.zeroize();
        header.zeroize();

        let block_size = block_size as usize;
        let scratch = vec![0u8; block_size + iv_size + TAG_SIZE];
        Ok(AesGcmCryptStream {
            inner,
            gcm,
            block_size,
            iv_size,
            check,
            scratch,
        })
    }

    pub fn iv_size(&self) -> usize {
        self.iv_size
    }

    pub fn underlying_block_size(&self) -> usize {
        self.block_size + self.iv_size + TAG_SIZE
    }

    fn underlying_offset(&self, block: u64) -> u64 {
        HEADER_SIZE as u64 + block * self.underlying_block_size() as u64
    }

    fn check_block_number(&self, block: u64) -> VeilResult<()> {
        if block > MAX_BLOCKS {
            return Err(VeilError::StreamTooLong {
                max: MAX_BLOCKS.saturating_mul(self.block_size as u64),
                requested: block.saturating_mul(self.block_size as u64),
            });
        }
        Ok(())
    }

    pub fn is_sparse(&self) -> bool {
        self.inner.is_sparse()
    }

    pub fn flush(&self) -> VeilResult<()> {
        self.inner.flush()
    }

    /// Logical size corresponding to an underlying size, per the format's
    /// size arithmetic.
    pub fn calculate_logical_size(underlying_size: u64, block_size: u64, iv_size: u64) -> u64 {
        let header = HEADER_SIZE as u64;
        let overhead = iv_size + TAG_SIZE as u64;
        if underlying_size <= header {
            return 0;
        }
        let payload = underlying_size - header;
        let underlying_block = block_size + overhead;
        let full_blocks = payload / underlying_block;
        let residue = payload % underlying_block;
        full_blocks * block_size + residue.saturating_sub(overhead)
    }
}

impl BlockAccess for AesGcmCryptStream {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn size(&self) -> VeilResult<u64> {
        Ok(Self::calculate_logical_size(
            self.inner.size()?,
            self.block_size as u64,
            self.iv_size as u64,
        ))
    }

    fn read_block(&mut self, block: u64, out: &mut [u8]) -> VeilResult<usize> {
        self.check_block_number(block)?;
        let underlying_block_size = self.underlying_block_size();
        let offset = self.underlying_offset(block);

        let got = self.inner.read_at(offset, &mut self.scratch)?;
        if got <= self.iv_size + TAG_SIZE {
            return Ok(0);
        }
        if got > underlying_block_size {
            return Err(VeilError::CorruptedStream);
        }
        let payload = got - self.iv_size - TAG_SIZE;

        if is_all_zeros(&self.scratch[..got]) {
            // Sparse hole: plaintext zeros, no authentication to do.
            out[..self.block_size].fill(0);
            return Ok(payload);
        }

        let mut aad = [0u8; 4];
        to_le_u32(block as u32, &mut aad);
        let (iv, rest) = self.scratch[..got].split_at(self.iv_size);
        let (ciphertext, tag) = rest.split_at(payload);
        let tag: &[u8; TAG_SIZE] = tag.try_into().map_err(|_| VeilError::CorruptedStream)?;

        let verified = self
            .gcm
            .open(iv, &aad, ciphertext, tag, &mut out[..payload])?;
        if !verified {
            if self.check {
                return Err(VeilError::MessageVerification);
            }
            warn!(block, "accepting unauthenticated block (salvage mode)");
        }
        Ok(payload)
    }

    fn write_block(&mut self, block: u64, data: &[u8]) -> VeilResult<()> {
        self.check_block_number(block)?;
        debug_assert!(data.len() <= self.block_size);
        let offset = self.underlying_offset(block);
        let underlying_len = data.len() + self.iv_size + TAG_SIZE;

        if is_all_zeros(data) {
            // Persist the sparse sentinel instead of ciphertext.
            self.scratch[..underlying_len].fill(0);
            return self.inner.write_at(offset, &self.scratch[..underlying_len]);
        }

        let mut aad = [0u8; 4];
        to_le_u32(block as u32, &mut aad);

        // An all-zero IV would collide with the sparse sentinel.
        loop {
            generate_random(&mut self.scratch[..self.iv_size]);
            if !is_all_zeros(&self.scratch[..self.iv_size]) {
                break;
            }
        }

        let (iv, rest) = self.scratch[..underlying_len].split_at_mut(self.iv_size);
        let (ciphertext, tag_region) = rest.split_at_mut(data.len());
        let mut tag = [0u8; TAG_SIZE];
        self.gcm.seal(iv, &aad, data, ciphertext, &mut tag)?;
        tag_region.copy_from_slice(&tag);

        self.inner.write_at(offset, &self.scratch[..underlying_len])
    }

    fn adjust_logical_size(&mut self, new_size: u64) -> VeilResult<()> {
        let block_size = self.block_size as u64;
        let full_blocks = new_size / block_size;
        let residue = new_size % block_size;
        let tail = if residue > 0 {
            residue + self.iv_size as u64 + TAG_SIZE as u64
        } else {
            0
        };
        self.inner.resize(
            HEADER_SIZE as u64 + full_blocks * self.underlying_block_size() as u64 + tail,
        )
    }
}
