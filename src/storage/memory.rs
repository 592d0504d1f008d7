//! In-memory file store.
//!
//! Behaves like a flat filesystem: `create` truncates immediately and every
//! write lands in the stored file as it happens, so an aborted upload leaves a
//! visible partial file until it is removed. Write failures can be injected.

use super::{file_name, FileEntry, FileStore, Listing, StorageError};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// File store kept in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileStore {
    files: Files,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryFileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file directly.
    pub fn insert(&self, path: &str, data: Vec<u8>) {
        lock(&self.files).insert(path.to_string(), data);
    }

    /// Copy of a file's contents.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    /// Make every subsequent create and write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    fn writes_failing(&self) -> bool {
        self.fail_writes.load(Ordering::Acquire)
    }
}

/// Lock the file map. A panic while holding the lock leaves the map intact,
/// so poisoning is ignored.
fn lock(files: &Files) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
    files.lock().unwrap_or_else(|e| e.into_inner())
}

impl FileStore for MemoryFileStore {
    fn list(&self) -> Result<Listing<'_>, StorageError> {
        let snapshot: Vec<FileEntry> = lock(&self.files)
            .iter()
            .map(|(path, data)| FileEntry {
                path: path.clone(),
                size_bytes: data.len() as u64,
            })
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn exists(&self, path: &str) -> bool {
        lock(&self.files).contains_key(path)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        file_name(path)?;
        let data = self
            .contents(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, StorageError> {
        file_name(path)?;
        if self.writes_failing() {
            return Err(StorageError::Write {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "storage unavailable"),
            });
        }
        lock(&self.files).insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryWriter {
            files: self.files.clone(),
            fail_writes: self.fail_writes.clone(),
            path: path.to_string(),
        }))
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        lock(&self.files)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

/// Writer appending straight into the stored file.
struct MemoryWriter {
    files: Files,
    fail_writes: Arc<AtomicBool>,
    path: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "storage unavailable"));
        }
        let mut files = lock(&self.files);
        let file = files
            .get_mut(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file removed"))?;
        file.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
