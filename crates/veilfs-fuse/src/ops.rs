//! FUSE-style operation table.
//!
//! [`Mount`] owns the immutable mount parameters and the open-handle
//! tables. The host binding calls these methods from its worker-thread
//! pool; each method returns zero (or a byte count) on success and a
//! negative POSIX errno on failure.
//!
//! The first call on each worker thread lazily constructs that thread's
//! [`FileSystem`] façade from the mount parameters and caches it in
//! thread-local storage; it is dropped when the thread exits. Façades of
//! mounts torn down earlier linger in surviving threads until then, which
//! is harmless: they hold no state besides keys and parameters.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, trace};
use veilfs_core::{flags, MountOptions, VeilError, VeilResult};

use crate::attr::{FileStat, StatVfs, TimeSpec};
use crate::file::File;
use crate::fs::FileSystem;

static NEXT_MOUNT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_FACADES: RefCell<HashMap<u64, Rc<FileSystem>>> =
        RefCell::new(HashMap::new());
}

pub struct Mount {
    id: u64,
    options: Arc<MountOptions>,
    files: Mutex<HashMap<u64, Arc<File>>>,
    dirs: Mutex<HashMap<u64, String>>,
    next_handle: AtomicU64,
}

impl Mount {
    pub fn new(options: MountOptions) -> VeilResult<Self> {
        options.validate()?;
        let id = NEXT_MOUNT_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            mount = id,
            root = %options.root.display(),
            block_size = options.block_size,
            iv_size = options.iv_size,
            "mount initialized"
        );
        Ok(Mount {
            id,
            options: Arc::new(options),
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    fn with_fs<R>(&self, op: impl FnOnce(&FileSystem) -> VeilResult<R>) -> VeilResult<R> {
        THREAD_FACADES.with(|cell| {
            let facade = {
                let mut map = cell.borrow_mut();
                match map.get(&self.id) {
                    Some(facade) => facade.clone(),
                    None => {
                        debug!(mount = self.id, "constructing per-thread façade");
                        let o = &self.options;
                        let facade = Rc::new(FileSystem::new(
                            o.root.clone(),
                            o.master_key.name_key(),
                            o.master_key.content_key(),
                            o.master_key.xattr_key(),
                            o.block_size,
                            o.iv_size,
                            o.flags,
                        )?);
                        map.insert(self.id, facade.clone());
                        facade
                    }
                }
            };
            op(&facade)
        })
    }

    fn register_file(&self, file: File) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, Arc::new(file));
        handle
    }

    fn file(&self, handle: u64) -> Option<Arc<File>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .cloned()
    }

    // ── attributes ────────────────────────────────────────────────────────

    pub fn getattr(&self, path: &str, st: &mut FileStat) -> i32 {
        trace!(path, "getattr");
        match self.with_fs(|fs| fs.stat(path)) {
            Ok(Some(found)) => {
                *st = found;
                0
            }
            Ok(None) => -libc::ENOENT,
            Err(e) => fail_lookup("getattr", path, &e),
        }
    }

    pub fn fgetattr(&self, handle: u64, st: &mut FileStat) -> i32 {
        let Some(file) = self.file(handle) else {
            return -libc::EBADF;
        };
        match file.fstat() {
            Ok(found) => {
                *st = found;
                0
            }
            Err(e) => fail("fgetattr", "", &e),
        }
    }

    pub fn statfs(&self, st: &mut StatVfs) -> i32 {
        match self.with_fs(|fs| fs.statvfs()) {
            Ok(mut vfs) => {
                // base32 inflates names 8/5, plus the 16-byte synthetic IV
                vfs.name_max = (vfs.name_max * 5 / 8).saturating_sub(16);
                *st = vfs;
                0
            }
            Err(e) => fail("statfs", "/", &e),
        }
    }

    // ── directories ───────────────────────────────────────────────────────

    pub fn opendir(&self, path: &str, handle: &mut u64) -> i32 {
        trace!(path, "opendir");
        match self.with_fs(|fs| fs.stat(path)) {
            Ok(Some(st)) if st.is_dir() => {
                let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
                self.dirs
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(fh, path.to_owned());
                *handle = fh;
                0
            }
            Ok(Some(_)) => -libc::ENOTDIR,
            Ok(None) => -libc::ENOENT,
            Err(e) => fail_lookup("opendir", path, &e),
        }
    }

    pub fn releasedir(&self, handle: u64) -> i32 {
        self.dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
        0
    }

    /// Lists the directory afresh on every call (the host may replay
    /// readdir from offset zero). The filler receives each decoded name
    /// with type-only attributes; a nonzero filler result stops the walk.
    pub fn readdir(&self, handle: u64, filler: &mut dyn FnMut(&str, &FileStat) -> i32) -> i32 {
        let path = {
            let dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
            match dirs.get(&handle) {
                Some(path) => path.clone(),
                None => return -libc::EBADF,
            }
        };
        match self.with_fs(|fs| fs.read_dir(&path)) {
            Ok(entries) => {
                for entry in entries {
                    let st = FileStat {
                        mode: entry.mode,
                        ..FileStat::default()
                    };
                    let rc = filler(&entry.name, &st);
                    if rc != 0 {
                        return -rc.abs();
                    }
                }
                0
            }
            Err(e) => fail("readdir", &path, &e),
        }
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> i32 {
        trace!(path, mode, "mkdir");
        errno_unit(self.with_fs(|fs| fs.mkdir(path, mode)), "mkdir", path)
    }

    pub fn rmdir(&self, path: &str) -> i32 {
        trace!(path, "rmdir");
        errno_unit(self.with_fs(|fs| fs.rmdir(path)), "rmdir", path)
    }

    // ── files ─────────────────────────────────────────────────────────────

    pub fn create(&self, path: &str, mode: u32, handle: &mut u64) -> i32 {
        trace!(path, mode, "create");
        match self.with_fs(|fs| fs.create(path, mode)) {
            Ok(file) => {
                *handle = self.register_file(file);
                0
            }
            Err(e) => fail("create", path, &e),
        }
    }

    pub fn open(&self, path: &str, open_flags: i32, handle: &mut u64) -> i32 {
        trace!(path, open_flags, "open");
        match self.with_fs(|fs| fs.open(path, open_flags, 0o644)) {
            Ok(file) => {
                *handle = self.register_file(file);
                0
            }
            Err(e) => fail("open", path, &e),
        }
    }

    pub fn release(&self, handle: u64) -> i32 {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
        0
    }

    pub fn read(&self, handle: u64, offset: u64, buf: &mut [u8]) -> i64 {
        let Some(file) = self.file(handle) else {
            return -libc::EBADF as i64;
        };
        match file.read(offset, buf) {
            Ok(n) => n as i64,
            Err(e) => fail("read", "", &e) as i64,
        }
    }

    pub fn write(&self, handle: u64, offset: u64, data: &[u8]) -> i64 {
        let Some(file) = self.file(handle) else {
            return -libc::EBADF as i64;
        };
        match file.write(offset, data) {
            Ok(()) => data.len() as i64,
            Err(e) => fail("write", "", &e) as i64,
        }
    }

    pub fn flush(&self, handle: u64) -> i32 {
        let Some(file) = self.file(handle) else {
            return -libc::EBADF;
        };
        errno_unit(file.flush(), "flush", "")
    }

    pub fn fsync(&self, handle: u64, _datasync: bool) -> i32 {
        let Some(file) = self.file(handle) else {
            return -libc::EBADF;
        };
        errno_unit(file.fsync(), "fsync", "")
    }

    pub fn ftruncate(&self, handle: u64, size: i64) -> i32 {
        if size < 0 {
            return -libc::EINVAL;
        }
        let Some(file) = self.file(handle) else {
            return -libc::EBADF;
        };
        errno_unit(file.resize(size as u64), "ftruncate", "")
    }

    pub fn truncate(&self, path: &str, size: i64) -> i32 {
        if size < 0 {
            return -libc::EINVAL;
        }
        trace!(path, size, "truncate");
        let result = self.with_fs(|fs| {
            let file = fs.open(path, libc::O_RDWR, 0o644)?;
            file.resize(size as u64)
        });
        errno_unit(result, "truncate", path)
    }

    pub fn unlink(&self, path: &str) -> i32 {
        trace!(path, "unlink");
        errno_unit(self.with_fs(|fs| fs.unlink(path)), "unlink", path)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> i32 {
        trace!(path, mode, "chmod");
        errno_unit(self.with_fs(|fs| fs.chmod(path, mode)), "chmod", path)
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> i32 {
        trace!(path, uid, gid, "chown");
        errno_unit(self.with_fs(|fs| fs.chown(path, uid, gid)), "chown", path)
    }

    pub fn utimens(&self, path: &str, times: Option<[TimeSpec; 2]>, handle: Option<u64>) -> i32 {
        trace!(path, "utimens");
        if let Some(handle) = handle {
            let Some(file) = self.file(handle) else {
                return -libc::EBADF;
            };
            return errno_unit(file.utimens(times), "utimens", path);
        }
        errno_unit(self.with_fs(|fs| fs.utimens(path, times)), "utimens", path)
    }

    pub fn rename(&self, from: &str, to: &str) -> i32 {
        trace!(from, to, "rename");
        errno_unit(self.with_fs(|fs| fs.rename(from, to)), "rename", from)
    }

    pub fn link(&self, source: &str, dest: &str) -> i32 {
        trace!(source, dest, "link");
        errno_unit(self.with_fs(|fs| fs.link(source, dest)), "link", source)
    }

    pub fn symlink(&self, target: &str, link_path: &str) -> i32 {
        trace!(target, link_path, "symlink");
        errno_unit(
            self.with_fs(|fs| fs.symlink(target, link_path)),
            "symlink",
            link_path,
        )
    }

    pub fn readlink(&self, path: &str, target: &mut String) -> i32 {
        trace!(path, "readlink");
        match self.with_fs(|fs| fs.readlink(path)) {
            Ok(found) => {
                *target = found;
                0
            }
            Err(e) => fail_lookup("readlink", path, &e),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl Mount {
    fn xattr_enabled(&self) -> bool {
        self.options.flags & flags::XATTR != 0
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8], xflags: i32) -> i32 {
        if !self.xattr_enabled() {
            return -libc::ENOSYS;
        }
        #[cfg(target_os = "macos")]
        {
            // "file is damaged" workaround: pretend the quarantine flag stuck
            if name == "com.apple.quarantine" {
                return 0;
            }
            // Finder hardcodes the value size; encrypting would break it
            if name == "com.apple.FinderInfo" {
                return -libc::EACCES;
            }
        }
        errno_unit(
            self.with_fs(|fs| fs.setxattr(path, name, value, xflags)),
            "setxattr",
            path,
        )
    }

    pub fn getxattr(&self, path: &str, name: &str, out: &mut Vec<u8>) -> i64 {
        if !self.xattr_enabled() {
            return -libc::ENOSYS as i64;
        }
        #[cfg(target_os = "macos")]
        if name == "com.apple.quarantine" || name == "com.apple.FinderInfo" {
            return -(libc::ENOATTR as i64);
        }
        match self.with_fs(|fs| fs.getxattr(path, name)) {
            Ok(value) => {
                let len = value.len() as i64;
                *out = value;
                len
            }
            Err(e) => fail("getxattr", path, &e) as i64,
        }
    }

    pub fn listxattr(&self, path: &str, out: &mut Vec<String>) -> i32 {
        if !self.xattr_enabled() {
            return -libc::ENOSYS;
        }
        match self.with_fs(|fs| fs.listxattr(path)) {
            Ok(names) => {
                *out = names;
                0
            }
            Err(e) => fail("listxattr", path, &e),
        }
    }

    pub fn removexattr(&self, path: &str, name: &str) -> i32 {
        if !self.xattr_enabled() {
            return -libc::ENOSYS;
        }
        errno_unit(
            self.with_fs(|fs| fs.removexattr(path, name)),
            "removexattr",
            path,
        )
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        info!(mount = self.id, "mount destroyed");
    }
}

fn fail(op: &'static str, path: &str, err: &VeilError) -> i32 {
    let errno = err.errno();
    error!(op, path, errno, "{err}");
    -errno
}

/// Error mapping for name-lookup contexts. A path component or symlink
/// target that fails to decode or authenticate is indistinguishable from a
/// missing file, so it surfaces as `ENOENT` rather than the codec's own
/// error code.
fn fail_lookup(op: &'static str, path: &str, err: &VeilError) -> i32 {
    match err {
        VeilError::InvalidFormat(_) | VeilError::MessageVerification => {
            debug!(op, path, "undecodable name treated as missing");
            -libc::ENOENT
        }
        _ => fail(op, path, err),
    }
}

fn errno_unit(result: VeilResult<()>, op: &'static str, path: &str) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => fail(op, path, &e),
    }
}
