//! Directory-backed file store.
//!
//! On host builds the root is an ordinary directory. On ESP32 it is the VFS
//! mount point of the SPIFFS partition, which `std::fs` reaches through
//! ESP-IDF's newlib layer.

use super::{file_name, FileEntry, FileStore, Listing, StorageError};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// File store rooted at a directory.
#[derive(Debug, Clone)]
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    /// Create a store over an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(file_name(path)?))
    }
}

impl FileStore for DirFileStore {
    fn list(&self) -> Result<Listing<'_>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StorageError::Read {
            path: "/".to_string(),
            source,
        })?;

        Ok(Box::new(entries.filter_map(|entry| {
            let entry = entry.ok()?;
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(FileEntry {
                path: format!("/{}", entry.file_name().to_string_lossy()),
                size_bytes: metadata.len(),
            })
        })))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let file = File::open(&full).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Read {
                path: path.to_string(),
                source,
            },
        })?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, StorageError> {
        let full = self.resolve(path)?;
        let file = File::create(&full).map_err(|source| StorageError::Write {
            path: path.to_string(),
            source,
        })?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Write {
                path: path.to_string(),
                source,
            },
        })
    }
}
