//! AES-GCM with caller-supplied IV and associated data.
//!
//! The mount's `iv_size` is a runtime parameter (12..=32 bytes), so this
//! module composes GCM from the block cipher, GHASH, and a CTR32 keystream
//! per NIST SP 800-38D instead of using a nonce-size-parameterized AEAD
//! type. 12-byte IVs take the `iv || 0x00000001` fast path; longer IVs are
//! hashed into J0 with GHASH.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use veilfs_core::{VeilError, VeilResult};

use crate::{MAX_IV_SIZE, MIN_IV_SIZE, TAG_SIZE};

enum Cipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl Cipher {
    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let block = aes::Block::from_mut_slice(block);
        match self {
            Cipher::Aes128(c) => c.encrypt_block(block),
            Cipher::Aes256(c) => c.encrypt_block(block),
        }
    }
}

pub struct Gcm {
    cipher: Cipher,
    ghash: GHash,
}

impl Gcm {
    /// Key must be 16 or 32 bytes.
    pub fn new(key: &[u8]) -> VeilResult<Self> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(
                Aes128::new_from_slice(key)
                    .map_err(|_| VeilError::InvalidArgument("bad AES-128 key".into()))?,
            ),
            32 => Cipher::Aes256(
                Aes256::new_from_slice(key)
                    .map_err(|_| VeilError::InvalidArgument("bad AES-256 key".into()))?,
            ),
            n => {
                return Err(VeilError::InvalidArgument(format!(
                    "AES-GCM key must be 16 or 32 bytes, got {n}"
                )))
            }
        };
        let mut h = [0u8; 16];
        cipher.encrypt_block(&mut h);
        Ok(Gcm {
            cipher,
            ghash: GHash::new(&h.into()),
        })
    }

    /// Encrypt `plaintext` into `ciphertext` (same length) and produce the
    /// 16-byte tag.
    pub fn seal(
        &self,
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
        ciphertext: &mut [u8],
        tag: &mut [u8; TAG_SIZE],
    ) -> VeilResult<()> {
        debug_assert_eq!(plaintext.len(), ciphertext.len());
        let j0 = self.derive_j0(iv)?;
        ciphertext.copy_from_slice(plaintext);
        self.apply_keystream(&j0, ciphertext);
        *tag = self.compute_tag(&j0, aad, ciphertext);
        Ok(())
    }

    /// Decrypt `ciphertext` into `plaintext` and report whether the tag
    /// matched. The plaintext is written unconditionally; callers in
    /// checking mode must discard it when this returns `false`.
    pub fn open(
        &self,
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
        plaintext: &mut [u8],
    ) -> VeilResult<bool> {
        debug_assert_eq!(plaintext.len(), ciphertext.len());
        let j0 = self.derive_j0(iv)?;
        let expected = self.compute_tag(&j0, aad, ciphertext);
        plaintext.copy_from_slice(ciphertext);
        self.apply_keystream(&j0, plaintext);
        Ok(expected.ct_eq(tag).into())
    }

    fn derive_j0(&self, iv: &[u8]) -> VeilResult<[u8; 16]> {
        if iv.len() < MIN_IV_SIZE || iv.len() > MAX_IV_SIZE {
            return Err(VeilError::InvalidArgument(format!(
                "IV size {} out of range {MIN_IV_SIZE}..={MAX_IV_SIZE}",
                iv.len()
            )));
        }
        let mut j0 = [0u8; 16];
        if iv.len() == 12 {
            j0[..12].copy_from_slice(iv);
            j0[15] = 1;
        } else {
            let mut gh = self.ghash.clone();
            gh.update_padded(iv);
            let mut len_block = [0u8; 16];
            len_block[8..].copy_from_slice(&(iv.len() as u64 * 8).to_be_bytes());
            gh.update(&[len_block.into()]);
            j0.copy_from_slice(gh.finalize().as_slice());
        }
        Ok(j0)
    }

    fn apply_keystream(&self, j0: &[u8; 16], data: &mut [u8]) {
        let mut counter = *j0;
        for chunk in data.chunks_mut(16) {
            inc32(&mut counter);
            let mut keystream = counter;
            self.cipher.encrypt_block(&mut keystream);
            for (byte, key) in chunk.iter_mut().zip(keystream.iter()) {
                *byte ^= key;
            }
        }
    }

    fn compute_tag(&self, j0: &[u8; 16], aad: &[u8], ciphertext: &[u8]) -> [u8; TAG_SIZE] {
        let mut gh = self.ghash.clone();
        gh.update_padded(aad);
        gh.update_padded(ciphertext);
        let mut len_block = [0u8; 16];
        len_block[..8].copy_from_slice(&(aad.len() as u64 * 8).to_be_bytes());
        len_block[8..].copy_from_slice(&(ciphertext.len() as u64 * 8).to_be_bytes());
        gh.update(&[len_block.into()]);

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(gh.finalize().as_slice());
        let mut ek_j0 = *j0;
        self.cipher.encrypt_block(&mut ek_j0);
        for (t, e) in tag.iter_mut().zip(ek_j0.iter()) {
            *t ^= e;
        }
        tag
    }
}

#[inline]
fn inc32(counter: &mut [u8; 16]) {
    let ctr = u32::from_be_bytes([counter[12], counter[13], counter[14], counter[15]]);
    counter[12..16].copy_from_slice(&ctr.wrapping_add(1).to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{generate_random, hexify, unhexify};
    use proptest::prelude::*;

    fn seal_vec(gcm: &Gcm, iv: &[u8], aad: &[u8], pt: &[u8]) -> (Vec<u8>, [u8; TAG_SIZE]) {
        let mut ct = vec![0u8; pt.len()];
        let mut tag = [0u8; TAG_SIZE];
        gcm.seal(iv, aad, pt, &mut ct, &mut tag).unwrap();
        (ct, tag)
    }

    #[test]
    fn nist_aes128_empty() {
        // SP 800-38D test case 1
        let gcm = Gcm::new(&[0u8; 16]).unwrap();
        let (_, tag) = seal_vec(&gcm, &[0u8; 12], b"", b"");
        assert_eq!(hexify(&tag), "58e2fccefa7e3061367f1d57a4e7455a");
    }

    #[test]
    fn nist_aes128_single_block() {
        // SP 800-38D test case 2
        let gcm = Gcm::new(&[0u8; 16]).unwrap();
        let (ct, tag) = seal_vec(&gcm, &[0u8; 12], b"", &[0u8; 16]);
        assert_eq!(hexify(&ct), "0388dace60b6a392f328c2b971b2fe78");
        assert_eq!(hexify(&tag), "ab6e47d42cec13bdf53a67b21257bda9");
    }

    #[test]
    fn nist_aes256_empty() {
        // SP 800-38D test case 13
        let gcm = Gcm::new(&[0u8; 32]).unwrap();
        let (_, tag) = seal_vec(&gcm, &[0u8; 12], b"", b"");
        assert_eq!(hexify(&tag), "530f8afbc74536b9a963b4f1c4cb738b");
    }

    #[test]
    fn nist_aes256_single_block() {
        // SP 800-38D test case 14
        let gcm = Gcm::new(&[0u8; 32]).unwrap();
        let (ct, tag) = seal_vec(&gcm, &[0u8; 12], b"", &[0u8; 16]);
        assert_eq!(hexify(&ct), "cea7403d4d606b6e074ec5d3baf39d18");
        assert_eq!(hexify(&tag), "d0d1c8a799996bf0265b98b5d48ab919");
    }

    #[test]
    fn nist_aes128_full_case() {
        // SP 800-38D test case 4: AAD + 60-byte plaintext
        let key = unhexify("feffe9928665731c6d6a8f9467308308").unwrap();
        let iv = unhexify("cafebabefacedbaddecaf888").unwrap();
        let pt = unhexify(
            "d9313225f88406e5a55909c5aff5269a86a7a9531534f7da2e4c303d8a318a72\
             1c3c0c95956809532fcf0e2449a6b525b16aedf5aa0de657ba637b39",
        )
        .unwrap();
        let aad = unhexify("feedfacedeadbeeffeedfacedeadbeefabaddad2").unwrap();
        let gcm = Gcm::new(&key).unwrap();
        let (ct, tag) = seal_vec(&gcm, &iv, &aad, &pt);
        assert_eq!(
            hexify(&ct),
            "42831ec2217774244b7221b784d0d49ce3aa212f2c02a4e035c17e2329aca12e\
             21d514b25466931c7d8f6a5aac84aa051ba30b396a0aac973d58e091"
        );
        assert_eq!(hexify(&tag), "5bc94fbc3221a5db94fae95ae7121a47");
    }

    #[test]
    fn rejects_bad_key_and_iv_sizes() {
        assert!(Gcm::new(&[0u8; 24]).is_err());
        let gcm = Gcm::new(&[0u8; 32]).unwrap();
        let mut ct = [0u8; 4];
        let mut tag = [0u8; TAG_SIZE];
        assert!(gcm.seal(&[0u8; 11], b"", b"abcd", &mut ct, &mut tag).is_err());
        assert!(gcm.seal(&[0u8; 33], b"", b"abcd", &mut ct, &mut tag).is_err());
    }

    #[test]
    fn tamper_detection() {
        let gcm = Gcm::new(&[9u8; 32]).unwrap();
        let mut iv = [0u8; 12];
        generate_random(&mut iv);
        let (mut ct, tag) = seal_vec(&gcm, &iv, b"aad", b"some content");
        let mut pt = vec![0u8; ct.len()];
        assert!(gcm.open(&iv, b"aad", &ct, &tag, &mut pt).unwrap());
        assert_eq!(pt, b"some content");

        ct[3] ^= 1;
        assert!(!gcm.open(&iv, b"aad", &ct, &tag, &mut pt).unwrap());
        ct[3] ^= 1;
        assert!(!gcm.open(&iv, b"wrong aad", &ct, &tag, &mut pt).unwrap());
        let mut bad_tag = tag;
        bad_tag[0] ^= 0x80;
        assert!(!gcm.open(&iv, b"aad", &ct, &bad_tag, &mut pt).unwrap());
    }

    proptest! {
        #[test]
        fn roundtrip_any_iv_size(
            key_wide in any::<bool>(),
            iv in proptest::collection::vec(any::<u8>(), 12..=32),
            aad in proptest::collection::vec(any::<u8>(), 0..=24),
            pt in proptest::collection::vec(any::<u8>(), 0..=300),
        ) {
            let key = if key_wide { vec![0x42u8; 32] } else { vec![0x42u8; 16] };
            let gcm = Gcm::new(&key).unwrap();
            let mut ct = vec![0u8; pt.len()];
            let mut tag = [0u8; TAG_SIZE];
            gcm.seal(&iv, &aad, &pt, &mut ct, &mut tag).unwrap();
            let mut back = vec![0u8; pt.len()];
            prop_assert!(gcm.open(&iv, &aad, &ct, &tag, &mut back).unwrap());
            prop_assert_eq!(back, pt);
        }
    }
}
