//! Logical-to-underlying path translation.
//!
//! A logical path is split on `/` (empty components dropped), each
//! component is name-encrypted, and the pieces are rejoined. `.` and `..`
//! pass through untouched; they never reach the name codec.

use veilfs_core::VeilResult;
use veilfs_crypto::NameCodec;

pub fn split_components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Encrypt every component of `path`. With `preserve_leading_slash`, an
/// absolute input stays absolute; symlink targets need this.
pub fn encrypt_path(
    codec: &NameCodec,
    path: &str,
    preserve_leading_slash: bool,
) -> VeilResult<String> {
    transform_path(path, preserve_leading_slash, |component| {
        codec.encrypt(component)
    })
}

/// Decrypt every component of an underlying path.
pub fn decrypt_path(
    codec: &NameCodec,
    path: &str,
    preserve_leading_slash: bool,
) -> VeilResult<String> {
    transform_path(path, preserve_leading_slash, |component| {
        codec.decrypt(component)
    })
}

fn transform_path(
    path: &str,
    preserve_leading_slash: bool,
    mut transform: impl FnMut(&str) -> VeilResult<String>,
) -> VeilResult<String> {
    let mut out = String::new();
    if preserve_leading_slash && path.starts_with('/') {
        out.push('/');
    }
    let mut first = true;
    for component in split_components(path) {
        if !first {
            out.push('/');
        }
        first = false;
        if component == "." || component == ".." {
            out.push_str(component);
        } else {
            out.push_str(&transform(component)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilfs_core::KEY_SIZE;

    fn codec() -> NameCodec {
        NameCodec::new(&[0x21u8; KEY_SIZE]).unwrap()
    }

    #[test]
    fn split_drops_empty_components() {
        let parts: Vec<&str> = split_components("/tmp//abcde/123/").collect();
        assert_eq!(parts, ["tmp", "abcde", "123"]);
        assert_eq!(split_components("").count(), 0);
        assert_eq!(split_components("//////").count(), 0);
    }

    #[test]
    fn roundtrip() {
        let codec = codec();
        let encrypted = encrypt_path(&codec, "/a/b/c.txt", false).unwrap();
        assert_eq!(encrypted.split('/').count(), 3);
        assert!(!encrypted.starts_with('/'));
        assert_eq!(decrypt_path(&codec, &encrypted, false).unwrap(), "a/b/c.txt");
    }

    #[test]
    fn empty_path_maps_to_empty() {
        let codec = codec();
        assert_eq!(encrypt_path(&codec, "", false).unwrap(), "");
        assert_eq!(encrypt_path(&codec, "/", false).unwrap(), "");
    }

    #[test]
    fn leading_slash_preserved_on_request() {
        let codec = codec();
        let absolute = encrypt_path(&codec, "/a/b", true).unwrap();
        assert!(absolute.starts_with('/'));
        assert_eq!(decrypt_path(&codec, &absolute, true).unwrap(), "/a/b");

        let relative = encrypt_path(&codec, "a/b", true).unwrap();
        assert!(!relative.starts_with('/'));
    }

    #[test]
    fn dot_components_pass_through() {
        let codec = codec();
        let encrypted = encrypt_path(&codec, "../a/./b", false).unwrap();
        let parts: Vec<&str> = encrypted.split('/').collect();
        assert_eq!(parts[0], "..");
        assert_eq!(parts[2], ".");
        assert_eq!(decrypt_path(&codec, &encrypted, false).unwrap(), "../a/./b");
    }

    #[test]
    fn component_encryption_is_positional_independent() {
        // the same component encrypts identically wherever it appears
        let codec = codec();
        let a = encrypt_path(&codec, "x/common", false).unwrap();
        let b = encrypt_path(&codec, "y/common", false).unwrap();
        assert_eq!(
            a.rsplit('/').next().unwrap(),
            b.rsplit('/').next().unwrap()
        );
    }
}
