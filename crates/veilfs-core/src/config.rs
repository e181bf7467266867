//! Mount configuration handed over by the external config/key loader.
//!
//! The loader owns the password KDF and the on-disk config file; veilfs
//! receives only the derived parameters below. Only format version 4 is
//! accepted.

use std::path::PathBuf;

use serde::Deserialize;
use zeroize::Zeroize;

use crate::error::{VeilError, VeilResult};

/// Size of each of the three sub-keys.
pub const KEY_SIZE: usize = 32;

/// Size of the whole mount secret: name key, content key, xattr key.
pub const MASTER_KEY_SIZE: usize = 3 * KEY_SIZE;

/// The only on-disk format this crate speaks.
pub const FORMAT_VERSION: u32 = 4;

/// Mount flag bits, as populated by the loader.
pub mod flags {
    /// Accept content blocks that fail authentication and hand back the raw
    /// decryption. Salvage tooling only; refused unless [`DEBUG`] is also
    /// set.
    pub const NO_VERIFY: u32 = 1 << 0;

    /// Marks the mount as a debugging session.
    pub const DEBUG: u32 = 1 << 1;

    /// Expose extended-attribute operations.
    pub const XATTR: u32 = 1 << 2;
}

/// The 96-byte mount secret. Zeroized on drop; `Debug` never prints key
/// material.
#[derive(Clone)]
pub struct MasterKey {
    name: [u8; KEY_SIZE],
    content: [u8; KEY_SIZE],
    xattr: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> VeilResult<Self> {
        if bytes.len() != MASTER_KEY_SIZE {
            return Err(VeilError::invalid_argument(format!(
                "master key must be {MASTER_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = MasterKey {
            name: [0u8; KEY_SIZE],
            content: [0u8; KEY_SIZE],
            xattr: [0u8; KEY_SIZE],
        };
        key.name.copy_from_slice(&bytes[..KEY_SIZE]);
        key.content.copy_from_slice(&bytes[KEY_SIZE..2 * KEY_SIZE]);
        key.xattr.copy_from_slice(&bytes[2 * KEY_SIZE..]);
        Ok(key)
    }

    pub fn name_key(&self) -> &[u8; KEY_SIZE] {
        &self.name
    }

    pub fn content_key(&self) -> &[u8; KEY_SIZE] {
        &self.content
    }

    pub fn xattr_key(&self) -> &[u8; KEY_SIZE] {
        &self.xattr
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.name.zeroize();
        self.content.zeroize();
        self.xattr.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl<'de> Deserialize<'de> for MasterKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        MasterKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Everything a mount needs, as produced by the loader.
#[derive(Debug, Clone, Deserialize)]
pub struct MountOptions {
    /// Backing directory holding the ciphertext tree.
    pub root: PathBuf,
    pub master_key: MasterKey,
    /// Logical (plaintext) block size in bytes.
    pub block_size: u32,
    /// Per-block IV size in bytes.
    pub iv_size: u32,
    /// Bits from [`flags`].
    #[serde(default)]
    pub flags: u32,
    /// On-disk format version; must be [`FORMAT_VERSION`].
    pub version: u32,
}

impl MountOptions {
    pub fn validate(&self) -> VeilResult<()> {
        if self.version != FORMAT_VERSION {
            return Err(VeilError::invalid_argument(format!(
                "unsupported filesystem format {} (only {FORMAT_VERSION} is supported)",
                self.version
            )));
        }
        if self.block_size < 32 {
            return Err(VeilError::invalid_argument(format!(
                "block size {} too small",
                self.block_size
            )));
        }
        if !(12..=32).contains(&self.iv_size) {
            return Err(VeilError::invalid_argument(format!(
                "IV size {} out of range 12..=32",
                self.iv_size
            )));
        }
        if self.flags & flags::NO_VERIFY != 0 && self.flags & flags::DEBUG == 0 {
            return Err(VeilError::invalid_argument(
                "authentication cannot be disabled outside a debug mount",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MountOptions {
        MountOptions {
            root: PathBuf::from("/tmp/x"),
            master_key: MasterKey::from_bytes(&[7u8; MASTER_KEY_SIZE]).unwrap(),
            block_size: 4096,
            iv_size: 12,
            flags: 0,
            version: FORMAT_VERSION,
        }
    }

    #[test]
    fn master_key_splits() {
        let mut bytes = vec![0u8; MASTER_KEY_SIZE];
        bytes[0] = 1;
        bytes[KEY_SIZE] = 2;
        bytes[2 * KEY_SIZE] = 3;
        let key = MasterKey::from_bytes(&bytes).unwrap();
        assert_eq!(key.name_key()[0], 1);
        assert_eq!(key.content_key()[0], 2);
        assert_eq!(key.xattr_key()[0], 3);
    }

    #[test]
    fn master_key_rejects_wrong_length() {
        assert!(MasterKey::from_bytes(&[0u8; 32]).is_err());
        assert!(MasterKey::from_bytes(&[0u8; 95]).is_err());
    }

    #[test]
    fn master_key_debug_is_redacted() {
        let key = MasterKey::from_bytes(&[0xAAu8; MASTER_KEY_SIZE]).unwrap();
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("170"));
    }

    #[test]
    fn validate_accepts_defaults() {
        options().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_version() {
        let mut o = options();
        o.version = 3;
        assert!(o.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_block_size() {
        let mut o = options();
        o.block_size = 16;
        assert!(o.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_iv_size() {
        let mut o = options();
        o.iv_size = 8;
        assert!(o.validate().is_err());
        o.iv_size = 33;
        assert!(o.validate().is_err());
    }

    #[test]
    fn validate_gates_no_verify_behind_debug() {
        let mut o = options();
        o.flags = flags::NO_VERIFY;
        assert!(o.validate().is_err());
        o.flags = flags::NO_VERIFY | flags::DEBUG;
        o.validate().unwrap();
    }
}
