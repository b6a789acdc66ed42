//! In-memory storage backend for tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory store.
///
/// Clones share the same bytes, so a test can keep a handle after giving the
/// backend to a coordinator and inspect or sabotage it later.
///
/// Reads and writes can be made to fail on demand with
/// [`InMemoryBackend::fail_reads`] and [`InMemoryBackend::fail_writes`].
///
/// # Example
///
/// ```rust
/// use stackdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.append(b"abc").unwrap();
/// assert_eq!(observer.data(), b"abc");
///
/// observer.fail_writes(true);
/// assert!(backend.append(b"d").is_err());
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    data: RwLock<Vec<u8>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        let backend = Self::default();
        *backend.inner.data.write() = data;
        backend
    }

    /// Returns a copy of all bytes in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.inner.data.read().clone()
    }

    /// Overwrites the byte at `offset`, for corruption tests.
    pub fn corrupt_byte(&self, offset: usize) {
        if let Some(byte) = self.inner.data.write().get_mut(offset) {
            *byte ^= 0xFF;
        }
    }

    /// Makes every subsequent append, flush, sync and truncate fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected("injected write failure".into()));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadRejected("injected read failure".into()));
        }

        let data = self.inner.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        #[allow(clippy::cast_possible_truncation)]
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_write()?;
        let mut data = self.inner.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_write()
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_write()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_write()?;
        let mut data = self.inner.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        data.truncate(new_size as usize);
        Ok(())
    }
}
