//! The filesystem façade: POSIX-style operations on logical paths, mapped
//! to host syscalls against the encrypted backing directory.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::warn;
use veilfs_core::{flags, VeilError, VeilResult, KEY_SIZE};
use veilfs_crypto::{NameCodec, XattrCodec};
use veilfs_stream::{AesGcmCryptStream, HostFile};
use zeroize::Zeroizing;

use crate::attr::{FileStat, StatVfs, TimeSpec};
use crate::file::File;
use crate::path::{decrypt_path, encrypt_path};

/// One directory entry as surfaced by [`FileSystem::read_dir`]. Only the
/// type bits of `mode` are populated; callers wanting a full stat issue
/// their own `stat` per name.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub mode: u32,
}

/// Per-thread façade over one backing directory. Holds the key schedules
/// and block parameters; never shared across threads.
pub struct FileSystem {
    root: PathBuf,
    name_codec: NameCodec,
    xattr_codec: XattrCodec,
    content_key: Zeroizing<[u8; KEY_SIZE]>,
    block_size: u32,
    iv_size: u32,
    flags: u32,
}

impl FileSystem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: PathBuf,
        name_key: &[u8; KEY_SIZE],
        content_key: &[u8; KEY_SIZE],
        xattr_key: &[u8; KEY_SIZE],
        block_size: u32,
        iv_size: u32,
        flags: u32,
    ) -> VeilResult<Self> {
        Ok(FileSystem {
            root,
            name_codec: NameCodec::new(name_key)?,
            xattr_codec: XattrCodec::new(xattr_key)?,
            content_key: Zeroizing::new(*content_key),
            block_size,
            iv_size,
            flags,
        })
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    fn verify_reads(&self) -> bool {
        self.flags & flags::NO_VERIFY == 0
    }

    /// Underlying path for a logical path; the empty path is the root.
    fn translate(&self, path: &str) -> VeilResult<PathBuf> {
        let encoded = encrypt_path(&self.name_codec, path, false)?;
        if encoded.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(encoded))
        }
    }

    /// `lstat` on the encoded path, translated. `None` means the logical
    /// path does not exist.
    pub fn stat(&self, path: &str) -> VeilResult<Option<FileStat>> {
        let underlying = self.translate(path)?;
        let md = match fs::symlink_metadata(&underlying) {
            Ok(md) => md,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut st = FileStat::from_metadata(&md);
        if md.file_type().is_file() {
            st.size = AesGcmCryptStream::calculate_logical_size(
                md.len(),
                self.block_size as u64,
                self.iv_size as u64,
            );
        } else if md.file_type().is_symlink() {
            st.size = self.readlink(path)?.len() as u64;
        }
        Ok(Some(st))
    }

    /// Open (or create) the logical path. `O_APPEND` is stripped because
    /// all write offsets are explicit, and write-only opens are upgraded
    /// to read-write: the header and partial-block rewrites need reads.
    pub fn open(&self, path: &str, open_flags: i32, mode: u32) -> VeilResult<File> {
        let mut open_flags = open_flags & !libc::O_APPEND;
        if open_flags & libc::O_ACCMODE == libc::O_WRONLY {
            open_flags = (open_flags & !libc::O_ACCMODE) | libc::O_RDWR;
        }
        let underlying = self.translate(path)?;
        let host = open_host_file(&underlying, open_flags, mode)?;
        File::new(
            host,
            &self.content_key,
            self.block_size,
            self.iv_size,
            self.verify_reads(),
        )
    }

    pub fn create(&self, path: &str, mode: u32) -> VeilResult<File> {
        self.open(path, libc::O_RDWR | libc::O_CREAT | libc::O_EXCL, mode)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> VeilResult<()> {
        let underlying = self.translate(path)?;
        fs::DirBuilder::new().mode(mode).create(underlying)?;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> VeilResult<()> {
        Ok(fs::remove_dir(self.translate(path)?)?)
    }

    pub fn unlink(&self, path: &str) -> VeilResult<()> {
        Ok(fs::remove_file(self.translate(path)?)?)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> VeilResult<()> {
        let underlying = self.translate(path)?;
        Ok(fs::set_permissions(
            underlying,
            fs::Permissions::from_mode(mode),
        )?)
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> VeilResult<()> {
        let underlying = cstring(&self.translate(path)?)?;
        let rc = unsafe { libc::lchown(underlying.as_ptr(), uid, gid) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn utimens(&self, path: &str, times: Option<[TimeSpec; 2]>) -> VeilResult<()> {
        let underlying = cstring(&self.translate(path)?)?;
        let ts = times.map(|t| [t[0].to_timespec(), t[1].to_timespec()]);
        let ptr = ts.as_ref().map_or(std::ptr::null(), |t| t.as_ptr());
        let rc = unsafe {
            libc::utimensat(
                libc::AT_FDCWD,
                underlying.as_ptr(),
                ptr,
                libc::AT_SYMLINK_NOFOLLOW,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Atomicity is whatever the host rename provides.
    pub fn rename(&self, from: &str, to: &str) -> VeilResult<()> {
        Ok(fs::rename(self.translate(from)?, self.translate(to)?)?)
    }

    pub fn link(&self, source: &str, dest: &str) -> VeilResult<()> {
        Ok(fs::hard_link(
            self.translate(source)?,
            self.translate(dest)?,
        )?)
    }

    /// Symlink targets are ciphertext on disk: every component of `target`
    /// is name-encrypted, keeping any leading slash.
    pub fn symlink(&self, target: &str, link_path: &str) -> VeilResult<()> {
        let encoded_target = encrypt_path(&self.name_codec, target, true)?;
        let underlying = self.translate(link_path)?;
        Ok(std::os::unix::fs::symlink(encoded_target, underlying)?)
    }

    pub fn readlink(&self, path: &str) -> VeilResult<String> {
        let underlying = self.translate(path)?;
        let target = fs::read_link(underlying)?;
        let target = target
            .to_str()
            .ok_or_else(|| VeilError::InvalidFormat("symlink target is not UTF-8".into()))?;
        decrypt_path(&self.name_codec, target, true)
    }

    /// Decrypted directory listing. `.`/`..` never appear, and entries
    /// whose names fail to decode are dropped: an undecodable name is a
    /// foreign file, indistinguishable from a missing one.
    pub fn read_dir(&self, path: &str) -> VeilResult<Vec<DirEntry>> {
        let underlying = self.translate(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&underlying)? {
            let entry = entry?;
            let raw_name = entry.file_name();
            let Some(raw) = raw_name.to_str() else {
                warn!(dir = path, "skipping non-UTF-8 entry in backing directory");
                continue;
            };
            let name = match self.name_codec.decrypt(raw) {
                Ok(name) => name,
                Err(_) => {
                    warn!(dir = path, entry = raw, "skipping undecodable entry");
                    continue;
                }
            };
            let file_type = entry.file_type()?;
            let mode = if file_type.is_dir() {
                libc::S_IFDIR as u32
            } else if file_type.is_symlink() {
                libc::S_IFLNK as u32
            } else if file_type.is_file() {
                libc::S_IFREG as u32
            } else {
                0
            };
            entries.push(DirEntry { name, mode });
        }
        Ok(entries)
    }

    /// Host statvfs of the backing directory; callers adjust `name_max`
    /// for the base32 and synthetic-IV inflation.
    pub fn statvfs(&self) -> VeilResult<StatVfs> {
        let root = cstring(&self.root)?;
        let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(root.as_ptr(), &mut vfs) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(StatVfs {
            block_size: vfs.f_bsize as u64,
            fragment_size: vfs.f_frsize as u64,
            blocks: vfs.f_blocks as u64,
            blocks_free: vfs.f_bfree as u64,
            blocks_available: vfs.f_bavail as u64,
            files: vfs.f_files as u64,
            files_free: vfs.f_ffree as u64,
            name_max: vfs.f_namemax as u64,
        })
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl FileSystem {
    pub fn setxattr(&self, path: &str, name: &str, value: &[u8], xflags: i32) -> VeilResult<()> {
        let underlying = cstring(&self.translate(path)?)?;
        let cname = xattr_name(name)?;
        let sealed = self.xattr_codec.seal(name, value)?;
        sys::setxattr(&underlying, &cname, &sealed, xflags)
    }

    pub fn getxattr(&self, path: &str, name: &str) -> VeilResult<Vec<u8>> {
        let underlying = cstring(&self.translate(path)?)?;
        let cname = xattr_name(name)?;
        let sealed = sys::getxattr(&underlying, &cname)?;
        self.xattr_codec.open(name, &sealed)
    }

    /// Attribute names are stored in the clear; pass the list through.
    pub fn listxattr(&self, path: &str) -> VeilResult<Vec<String>> {
        let underlying = cstring(&self.translate(path)?)?;
        let raw = sys::listxattr(&underlying)?;
        Ok(raw
            .split(|&b| b == 0)
            .filter(|name| !name.is_empty())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect())
    }

    pub fn removexattr(&self, path: &str, name: &str) -> VeilResult<()> {
        let underlying = cstring(&self.translate(path)?)?;
        let cname = xattr_name(name)?;
        sys::removexattr(&underlying, &cname)
    }
}

fn cstring(path: &Path) -> VeilResult<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| VeilError::InvalidArgument("path contains NUL".into()))
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn xattr_name(name: &str) -> VeilResult<CString> {
    CString::new(name).map_err(|_| VeilError::InvalidArgument("xattr name contains NUL".into()))
}

fn open_host_file(path: &Path, open_flags: i32, mode: u32) -> VeilResult<HostFile> {
    use std::os::fd::FromRawFd;

    let cpath = cstring(path)?;
    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            open_flags | libc::O_CLOEXEC,
            mode as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(HostFile::new(unsafe { fs::File::from_raw_fd(fd) }))
}

/// Raw xattr syscalls; `l*` variants on Linux, `XATTR_NOFOLLOW` on macOS.
#[cfg(any(target_os = "linux", target_os = "macos"))]
mod sys {
    use std::ffi::CStr;
    use std::io;

    use veilfs_core::VeilResult;

    pub fn setxattr(path: &CStr, name: &CStr, value: &[u8], flags: i32) -> VeilResult<()> {
        #[cfg(target_os = "linux")]
        let rc = unsafe {
            libc::lsetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                flags,
            )
        };
        #[cfg(target_os = "macos")]
        let rc = unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                0,
                flags | libc::XATTR_NOFOLLOW,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn getxattr(path: &CStr, name: &CStr) -> VeilResult<Vec<u8>> {
        let size = getxattr_raw(path, name, &mut [])?;
        let mut buf = vec![0u8; size];
        let got = getxattr_raw(path, name, &mut buf)?;
        buf.truncate(got);
        Ok(buf)
    }

    fn getxattr_raw(path: &CStr, name: &CStr, buf: &mut [u8]) -> VeilResult<usize> {
        #[cfg(target_os = "linux")]
        let rc = unsafe {
            libc::lgetxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        #[cfg(target_os = "macos")]
        let rc = unsafe {
            libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                libc::XATTR_NOFOLLOW,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(rc as usize)
    }

    pub fn listxattr(path: &CStr) -> VeilResult<Vec<u8>> {
        let size = listxattr_raw(path, &mut [])?;
        let mut buf = vec![0u8; size];
        let got = listxattr_raw(path, &mut buf)?;
        buf.truncate(got);
        Ok(buf)
    }

    fn listxattr_raw(path: &CStr, buf: &mut [u8]) -> VeilResult<usize> {
        #[cfg(target_os = "linux")]
        let rc =
            unsafe { libc::llistxattr(path.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
        #[cfg(target_os = "macos")]
        let rc = unsafe {
            libc::listxattr(
                path.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                libc::XATTR_NOFOLLOW,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(rc as usize)
    }

    pub fn removexattr(path: &CStr, name: &CStr) -> VeilResult<()> {
        #[cfg(target_os = "linux")]
        let rc = unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) };
        #[cfg(target_os = "macos")]
        let rc =
            unsafe { libc::removexattr(path.as_ptr(), name.as_ptr(), libc::XATTR_NOFOLLOW) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}
