//! Per-file session-key derivation.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use veilfs_core::{VeilError, VeilResult};

use crate::HEADER_SIZE;

/// Derive the per-file session key: AES-256-ECB of the file's random
/// 32-byte header under the content key. The header is random and
/// encrypted exactly once, and the on-disk format pins this construction;
/// do not substitute a chained mode.
pub fn derive_session_key(
    content_key: &[u8; 32],
    header: &[u8; HEADER_SIZE],
) -> VeilResult<[u8; HEADER_SIZE]> {
    let cipher = Aes256::new_from_slice(content_key)
        .map_err(|_| VeilError::InvalidArgument("bad content key".into()))?;
    let mut session = *header;
    for block in session.chunks_exact_mut(16) {
        cipher.encrypt_block(aes::Block::from_mut_slice(block));
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::generate_random;

    #[test]
    fn derivation_is_deterministic() {
        let key = [0x11u8; 32];
        let mut header = [0u8; HEADER_SIZE];
        generate_random(&mut header);
        let a = derive_session_key(&key, &header).unwrap();
        let b = derive_session_key(&key, &header).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, header);
    }

    #[test]
    fn different_headers_different_keys() {
        let key = [0x11u8; 32];
        let a = derive_session_key(&key, &[1u8; HEADER_SIZE]).unwrap();
        let b = derive_session_key(&key, &[2u8; HEADER_SIZE]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn blocks_encrypt_independently() {
        // ECB: equal header halves produce equal session-key halves.
        let key = [0x7fu8; 32];
        let header = [0xABu8; HEADER_SIZE];
        let session = derive_session_key(&key, &header).unwrap();
        assert_eq!(session[..16], session[16..]);
    }
}
