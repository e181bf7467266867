//! Extended-attribute value encryption.
//!
//! Attribute names stay in the clear; values are sealed with AES-GCM under
//! the xattr key. The IV is synthesized from the attribute name so a value
//! can be re-read without extra stored state, and the name is bound as AAD
//! so values cannot be swapped between attributes. Stored form:
//!
//! ```text
//! ciphertext[len(value)] || tag[16]
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;
use veilfs_core::{VeilError, VeilResult, KEY_SIZE};
use zeroize::Zeroize;

use crate::gcm::Gcm;
use crate::{SIV_SIZE, TAG_SIZE};

type HmacSha256 = Hmac<Sha256>;

pub struct XattrCodec {
    gcm: Gcm,
    prf: HmacSha256,
}

impl XattrCodec {
    pub fn new(xattr_key: &[u8; KEY_SIZE]) -> VeilResult<Self> {
        let prf = HmacSha256::new_from_slice(xattr_key)
            .map_err(|_| VeilError::InvalidArgument("bad xattr key".into()))?;
        Ok(XattrCodec {
            gcm: Gcm::new(xattr_key)?,
            prf,
        })
    }

    fn iv_for(&self, name: &str) -> [u8; SIV_SIZE] {
        let mut prf = self.prf.clone();
        prf.update(name.as_bytes());
        let digest = prf.finalize().into_bytes();
        let mut iv = [0u8; SIV_SIZE];
        iv.copy_from_slice(&digest[..SIV_SIZE]);
        iv
    }

    pub fn seal(&self, name: &str, value: &[u8]) -> VeilResult<Vec<u8>> {
        let iv = self.iv_for(name);
        let mut out = vec![0u8; value.len() + TAG_SIZE];
        let (ct, tag_region) = out.split_at_mut(value.len());
        let mut tag = [0u8; TAG_SIZE];
        self.gcm.seal(&iv, name.as_bytes(), value, ct, &mut tag)?;
        tag_region.copy_from_slice(&tag);
        Ok(out)
    }

    pub fn open(&self, name: &str, stored: &[u8]) -> VeilResult<Vec<u8>> {
        if stored.len() < TAG_SIZE {
            return Err(VeilError::CorruptedStream);
        }
        let (ct, tag) = stored.split_at(stored.len() - TAG_SIZE);
        let tag: &[u8; TAG_SIZE] = tag.try_into().map_err(|_| VeilError::CorruptedStream)?;
        let iv = self.iv_for(name);
        let mut value = vec![0u8; ct.len()];
        if !self.gcm.open(&iv, name.as_bytes(), ct, tag, &mut value)? {
            value.zeroize();
            return Err(VeilError::MessageVerification);
        }
        Ok(value)
    }
}
