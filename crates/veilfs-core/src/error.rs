use thiserror::Error;

pub type VeilResult<T> = Result<T, VeilError>;

#[derive(Debug, Error)]
pub enum VeilError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// AEAD tag mismatch on a content block or an xattr value.
    #[error("message authentication failed")]
    MessageVerification,

    #[error("stream too long: byte {requested} exceeds the format maximum {max}")]
    StreamTooLong { max: u64, requested: u64 },

    /// Structural corruption in the underlying file: impossible block
    /// length, non-canonical residue.
    #[error("stream is corrupted")]
    CorruptedStream,

    /// Malformed base32, an encrypted name that fails to parse or
    /// authenticate, or other wire-format violations.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VeilError {
    /// The POSIX error code surfaced at the operation-table boundary.
    ///
    /// Name-lookup contexts translate `MessageVerification` and
    /// `InvalidFormat` to `ENOENT` themselves; an undecodable name is
    /// indistinguishable from a missing file.
    pub fn errno(&self) -> i32 {
        match self {
            VeilError::InvalidArgument(_) | VeilError::InvalidFormat(_) => libc::EINVAL,
            VeilError::MessageVerification | VeilError::CorruptedStream => libc::EIO,
            VeilError::StreamTooLong { .. } => libc::EFBIG,
            VeilError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        VeilError::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(
            VeilError::InvalidArgument("x".into()).errno(),
            libc::EINVAL
        );
        assert_eq!(VeilError::MessageVerification.errno(), libc::EIO);
        assert_eq!(
            VeilError::StreamTooLong {
                max: 1,
                requested: 2
            }
            .errno(),
            libc::EFBIG
        );
        assert_eq!(VeilError::CorruptedStream.errno(), libc::EIO);
    }

    #[test]
    fn io_errno_passthrough() {
        let e = VeilError::Io(std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(e.errno(), libc::ENOSPC);
    }
}
