//! Random-access byte streams over host files and memory.

use std::fs;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use veilfs_core::VeilResult;

/// A random-access byte store. Methods take `&self`; implementations are
/// positionless (pread/pwrite style) and internally synchronized where
/// they need to be.
pub trait ByteStream: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`; short only at end of
    /// stream.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> VeilResult<usize>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> VeilResult<()>;
    fn resize(&self, new_len: u64) -> VeilResult<()>;
    fn size(&self) -> VeilResult<u64>;
    fn flush(&self) -> VeilResult<()>;
    fn fsync(&self) -> VeilResult<()> {
        self.flush()
    }
    fn is_sparse(&self) -> bool {
        false
    }
}

/// A host file opened by the filesystem façade. Beyond the stream
/// interface it exposes the handle-level operations the file object needs:
/// stat, times, advisory locking.
pub struct HostFile {
    file: fs::File,
}

impl HostFile {
    pub fn new(file: fs::File) -> Self {
        HostFile { file }
    }

    pub fn metadata(&self) -> VeilResult<fs::Metadata> {
        Ok(self.file.metadata()?)
    }

    /// Acquire the host advisory lock; blocks until granted.
    pub fn lock(&self, exclusive: bool) -> VeilResult<()> {
        let op = if exclusive {
            libc::LOCK_EX
        } else {
            libc::LOCK_SH
        };
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), op) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn unlock(&self) {
        // Releasing a lock we hold cannot meaningfully fail.
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }

    pub fn utimens(&self, times: Option<[libc::timespec; 2]>) -> VeilResult<()> {
        let ptr = times.as_ref().map_or(std::ptr::null(), |t| t.as_ptr());
        let rc = unsafe { libc::futimens(self.file.as_raw_fd(), ptr) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl ByteStream for HostFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> VeilResult<usize> {
        let mut total = 0usize;
        while total < buf.len() {
            match self.file.read_at(&mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> VeilResult<()> {
        Ok(self.file.write_all_at(buf, offset)?)
    }

    fn resize(&self, new_len: u64) -> VeilResult<()> {
        Ok(self.file.set_len(new_len)?)
    }

    fn size(&self) -> VeilResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn flush(&self) -> VeilResult<()> {
        // pwrite already reached the page cache; nothing buffered here.
        Ok(())
    }

    fn fsync(&self) -> VeilResult<()> {
        Ok(self.file.sync_all()?)
    }

    fn is_sparse(&self) -> bool {
        true
    }
}

/// In-memory stream for tests and format tooling.
#[derive(Default)]
pub struct MemoryStream {
    data: Mutex<Vec<u8>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        MemoryStream::default()
    }

    pub fn with_contents(data: Vec<u8>) -> Self {
        MemoryStream {
            data: Mutex::new(data),
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Overwrite raw underlying bytes; test hook for corruption scenarios.
    pub fn patch(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl ByteStream for MemoryStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> VeilResult<usize> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> VeilResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let end = offset as usize + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn resize(&self, new_len: u64) -> VeilResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.resize(new_len as usize, 0);
        Ok(())
    }

    fn size(&self) -> VeilResult<u64> {
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).len() as u64)
    }

    fn flush(&self) -> VeilResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_basics() {
        let stream = MemoryStream::new();
        assert_eq!(stream.size().unwrap(), 0);

        stream.write_at(3, b"abc").unwrap();
        assert_eq!(stream.size().unwrap(), 6);

        let mut buf = [0u8; 8];
        let n = stream.read_at(0, &mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[..6], b"\0\0\0abc");

        assert_eq!(stream.read_at(100, &mut buf).unwrap(), 0);

        stream.resize(4).unwrap();
        assert_eq!(stream.snapshot(), b"\0\0\0a");
    }

    #[test]
    fn host_file_read_write_resize() {
        let dir = tempfile::tempdir().unwrap();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join("f"))
            .unwrap();
        let host = HostFile::new(file);

        host.write_at(4096, b"hello").unwrap();
        assert_eq!(host.size().unwrap(), 4101);

        let mut buf = [0u8; 5];
        assert_eq!(host.read_at(4096, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        // the gap reads back as zeros
        let mut gap = [1u8; 16];
        assert_eq!(host.read_at(0, &mut gap).unwrap(), 16);
        assert!(gap.iter().all(|&b| b == 0));

        host.resize(2).unwrap();
        assert_eq!(host.size().unwrap(), 2);
        assert!(host.is_sparse());
    }

    #[test]
    fn host_file_locking() {
        let dir = tempfile::tempdir().unwrap();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join("f"))
            .unwrap();
        let host = HostFile::new(file);
        host.lock(true).unwrap();
        host.unlock();
        host.lock(false).unwrap();
        host.unlock();
    }
}
