//! Streamed uploads.
//!
//! An [`UploadSession`] owns the open target for the duration of an upload.
//! Chunks are appended as they arrive, so a large file is never buffered in
//! full. Unless [`UploadSession::finish`] succeeds, dropping the session
//! closes the handle and removes the partial file.

use super::{FileStore, StorageError};
use log::{debug, info, warn};
use std::io::Write;
use std::sync::Arc;

/// Open upload to a single file.
pub struct UploadSession {
    store: Arc<dyn FileStore>,
    path: String,
    writer: Option<Box<dyn Write + Send>>,
    written: u64,
}

impl UploadSession {
    /// Start an upload, creating or truncating `path`.
    pub fn begin(store: Arc<dyn FileStore>, path: &str) -> Result<Self, StorageError> {
        let writer = store.create(path)?;
        info!("Upload started: {}", path);
        Ok(Self {
            store,
            path: path.to_string(),
            writer: Some(writer),
            written: 0,
        })
    }

    /// Target path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append a chunk.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let writer = self.writer.as_mut().ok_or_else(|| StorageError::Write {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "upload already closed"),
        })?;
        writer
            .write_all(chunk)
            .map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })?;
        self.written += chunk.len() as u64;
        debug!("Upload {}: +{} bytes", self.path, chunk.len());
        Ok(())
    }

    /// Flush and close the file, keeping it.
    ///
    /// If the final flush fails the partial file is discarded.
    pub fn finish(mut self) -> Result<u64, StorageError> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(source) = writer.flush() {
                drop(writer);
                self.discard();
                return Err(StorageError::Write {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        info!("Upload finished: {} ({} bytes)", self.path, self.written);
        Ok(self.written)
    }

    /// Abort the upload and remove the partial file.
    pub fn abort(mut self) {
        self.writer.take();
        self.discard();
    }

    fn discard(&mut self) {
        match self.store.remove(&self.path) {
            Ok(()) => warn!("Upload aborted, removed partial {}", self.path),
            Err(e) => warn!("Upload aborted, could not remove {}: {}", self.path, e),
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        // Still holding the writer means neither finish nor abort ran.
        if let Some(writer) = self.writer.take() {
            drop(writer);
            self.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFileStore;

    fn store() -> (Arc<MemoryFileStore>, Arc<dyn FileStore>) {
        let files = Arc::new(MemoryFileStore::new());
        let dyn_files: Arc<dyn FileStore> = files.clone();
        (files, dyn_files)
    }

    #[test]
    fn test_chunks_appended() {
        let (files, store) = store();
        let mut session = UploadSession::begin(store, "/big.bin").unwrap();
        session.append(b"abc").unwrap();
        session.append(b"def").unwrap();
        assert_eq!(session.written(), 6);
        assert_eq!(session.finish().unwrap(), 6);
        assert_eq!(files.contents("/big.bin").unwrap(), b"abcdef".to_vec());
    }

    #[test]
    fn test_drop_discards_partial() {
        let (files, store) = store();
        {
            let mut session = UploadSession::begin(store, "/partial.bin").unwrap();
            session.append(b"half").unwrap();
            assert!(files.exists("/partial.bin"));
        }
        assert!(!files.exists("/partial.bin"));
    }

    #[test]
    fn test_abort_discards_partial() {
        let (files, store) = store();
        let mut session = UploadSession::begin(store, "/partial.bin").unwrap();
        session.append(b"half").unwrap();
        session.abort();
        assert!(!files.exists("/partial.bin"));
    }

    #[test]
    fn test_append_failure_then_drop() {
        let (files, store) = store();
        let mut session = UploadSession::begin(store, "/x.bin").unwrap();
        files.set_fail_writes(true);
        assert!(session.append(b"data").is_err());
        drop(session);
        assert!(!files.exists("/x.bin"));
    }

    #[test]
    fn test_begin_failure() {
        let (files, store) = store();
        files.set_fail_writes(true);
        assert!(UploadSession::begin(store, "/x.bin").is_err());
        assert!(!files.exists("/x.bin"));
    }
}
