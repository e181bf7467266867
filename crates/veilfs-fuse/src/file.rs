//! An open file: host handle plus its decrypting stream.

use std::sync::{Arc, Mutex};

use veilfs_core::VeilResult;
use veilfs_stream::{AesGcmCryptStream, BlockAccess, ByteStream, HostFile};

use crate::attr::{FileStat, TimeSpec};

/// Owns the host file and the crypt stream wrapping it. Every data-bearing
/// operation holds the process-local mutex and the host advisory lock for
/// its whole duration: shared for reads, exclusive for everything that
/// writes.
pub struct File {
    host: Arc<HostFile>,
    stream: Mutex<AesGcmCryptStream>,
}

struct HostLock<'a>(&'a HostFile);

impl Drop for HostLock<'_> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

impl File {
    pub fn new(
        host: HostFile,
        content_key: &[u8; 32],
        block_size: u32,
        iv_size: u32,
        check: bool,
    ) -> VeilResult<Self> {
        let host = Arc::new(host);
        let stream = AesGcmCryptStream::new(host.clone(), content_key, block_size, iv_size, check)?;
        Ok(File {
            host,
            stream: Mutex::new(stream),
        })
    }

    fn locked<R>(
        &self,
        exclusive: bool,
        op: impl FnOnce(&mut AesGcmCryptStream) -> VeilResult<R>,
    ) -> VeilResult<R> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        self.host.lock(exclusive)?;
        let _guard = HostLock(&self.host);
        op(&mut stream)
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> VeilResult<usize> {
        self.locked(false, |stream| stream.read(offset, buf))
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> VeilResult<()> {
        self.locked(true, |stream| stream.write(offset, data))
    }

    pub fn resize(&self, new_size: u64) -> VeilResult<()> {
        self.locked(true, |stream| stream.resize(new_size))
    }

    pub fn flush(&self) -> VeilResult<()> {
        self.locked(true, |stream| stream.flush())
    }

    pub fn fsync(&self) -> VeilResult<()> {
        self.locked(true, |_| self.host.fsync())
    }

    pub fn size(&self) -> VeilResult<u64> {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        stream.size()
    }

    pub fn utimens(&self, times: Option<[TimeSpec; 2]>) -> VeilResult<()> {
        let times = times.map(|t| [t[0].to_timespec(), t[1].to_timespec()]);
        self.host.utimens(times)
    }

    /// Host stat with the size replaced by the logical size.
    pub fn fstat(&self) -> VeilResult<FileStat> {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        let mut st = FileStat::from_metadata(&self.host.metadata()?);
        st.size = stream.size()?;
        Ok(st)
    }

    pub fn is_sparse(&self) -> bool {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        stream.is_sparse()
    }
}
