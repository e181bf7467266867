//! Deterministic authenticated filename encryption.
//!
//! Directory lookups need the same plaintext to encrypt to the same
//! underlying name every time, which rules out random IVs. Instead the IV
//! is synthesized from the plaintext itself with HMAC-SHA256 under the
//! name key, then the component is sealed with AES-GCM under that IV:
//!
//! ```text
//! base32( siv[16] || ciphertext[len(name)] || tag[16] )
//! ```
//!
//! Any failure to parse or authenticate is reported as `InvalidFormat`;
//! lookups treat such names as nonexistent.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use veilfs_core::{VeilError, VeilResult, KEY_SIZE};
use zeroize::Zeroize;

use crate::gcm::Gcm;
use crate::{base32, SIV_SIZE, TAG_SIZE};

type HmacSha256 = Hmac<Sha256>;

pub struct NameCodec {
    gcm: Gcm,
    prf: HmacSha256,
}

impl NameCodec {
    pub fn new(name_key: &[u8; KEY_SIZE]) -> VeilResult<Self> {
        let prf = HmacSha256::new_from_slice(name_key)
            .map_err(|_| VeilError::InvalidArgument("bad name key".into()))?;
        Ok(NameCodec {
            gcm: Gcm::new(name_key)?,
            prf,
        })
    }

    fn synthesize_iv(&self, plaintext: &[u8]) -> [u8; SIV_SIZE] {
        let mut prf = self.prf.clone();
        prf.update(plaintext);
        let digest = prf.finalize().into_bytes();
        let mut iv = [0u8; SIV_SIZE];
        iv.copy_from_slice(&digest[..SIV_SIZE]);
        iv
    }

    /// Encrypt a single path component. Deterministic under a fixed key.
    pub fn encrypt(&self, name: &str) -> VeilResult<String> {
        let plaintext = name.as_bytes();
        let iv = self.synthesize_iv(plaintext);

        let mut raw = vec![0u8; SIV_SIZE + plaintext.len() + TAG_SIZE];
        raw[..SIV_SIZE].copy_from_slice(&iv);
        let (ct, tag_region) = raw[SIV_SIZE..].split_at_mut(plaintext.len());
        let mut tag = [0u8; TAG_SIZE];
        self.gcm.seal(&iv, b"", plaintext, ct, &mut tag)?;
        tag_region.copy_from_slice(&tag);

        Ok(base32::encode(&raw))
    }

    /// Decrypt a single underlying name component.
    pub fn decrypt(&self, encoded: &str) -> VeilResult<String> {
        let raw = base32::decode(encoded)?;
        if raw.len() < SIV_SIZE + TAG_SIZE {
            return Err(VeilError::InvalidFormat("encrypted name too short".into()));
        }
        let (iv, rest) = raw.split_at(SIV_SIZE);
        let (ct, tag) = rest.split_at(rest.len() - TAG_SIZE);
        let tag: &[u8; TAG_SIZE] = tag
            .try_into()
            .map_err(|_| VeilError::InvalidFormat("encrypted name too short".into()))?;

        let mut plaintext = vec![0u8; ct.len()];
        if !self.gcm.open(iv, b"", ct, tag, &mut plaintext)? {
            plaintext.zeroize();
            return Err(VeilError::InvalidFormat(
                "encrypted name failed authentication".into(),
            ));
        }
        String::from_utf8(plaintext)
            .map_err(|_| VeilError::InvalidFormat("decrypted name is not UTF-8".into()))
    }
}
