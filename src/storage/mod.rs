//! Device filesystem access.
//!
//! The device exposes a single flat root directory. Paths are absolute
//! strings such as `/notes.txt`; nested directories are not supported.
//!
//! # Components
//!
//! - [`FileStore`] - backend trait with the adapter operations built on top
//! - [`dir`] - directory-backed store (host directory or ESP-IDF VFS mount)
//! - [`memory`] - in-memory store for tests and emulation
//! - [`upload`] - streamed upload session that discards partial files
//! - [`mount`] - storage mount at startup

mod dir;
mod memory;
pub mod mount;
mod upload;

pub use dir::DirFileStore;
pub use memory::MemoryFileStore;
pub use mount::{mount, MountError};
pub use upload::UploadSession;

use log::{debug, info};
use serde::Serialize;
use std::io::{self, Read, Write};
use thiserror::Error;

/// One file in the root directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Absolute path, e.g. `/notes.txt`.
    pub path: String,
    /// Size in bytes.
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

/// Lazy enumeration of the root directory.
pub type Listing<'a> = Box<dyn Iterator<Item = FileEntry> + 'a>;

/// Errors from the file store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No file at the path.
    #[error("file not found: {0}")]
    NotFound(String),
    /// Path is empty or escapes the flat root.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Reading failed.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Writing failed.
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Backend for the device filesystem.
///
/// Implementors provide the primitive operations; listing usage, whole-file
/// writes and lenient deletes are provided on top of them.
pub trait FileStore: Send + Sync {
    /// Enumerate the root directory. Each call re-reads the directory.
    fn list(&self) -> Result<Listing<'_>, StorageError>;

    /// Whether a file exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Open a file for reading.
    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Create or truncate a file for writing.
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, StorageError>;

    /// Remove a file.
    fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Total size of all files, from a fresh listing.
    fn used_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.list()?.map(|entry| entry.size_bytes).sum())
    }

    /// Read a file. Alias of [`FileStore::open_read`].
    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        self.open_read(path)
    }

    /// Write a whole file from a reader.
    ///
    /// On failure the partial file is removed.
    fn write(&self, path: &str, source: &mut dyn Read) -> Result<u64, StorageError> {
        let mut writer = self.create(path)?;
        let copied = io::copy(source, &mut writer).and_then(|n| writer.flush().map(|_| n));
        drop(writer);
        match copied {
            Ok(n) => {
                debug!("Wrote {} ({} bytes)", path, n);
                Ok(n)
            }
            Err(source) => {
                let _ = self.remove(path);
                Err(StorageError::Write {
                    path: path.to_string(),
                    source,
                })
            }
        }
    }

    /// Delete a file using lenient path lookup.
    ///
    /// A missing leading `/` is added. If that misses and the path contains
    /// spaces, the same path with spaces replaced by `+` is tried once.
    /// Returns the path that was actually removed.
    fn delete(&self, path: &str) -> Result<String, StorageError> {
        let resolved = resolve_delete_path(path, |p| self.exists(p))
            .ok_or_else(|| StorageError::NotFound(normalize_path(path)))?;
        self.remove(&resolved)?;
        info!("Deleted {}", resolved);
        Ok(resolved)
    }
}

/// Trim and prepend the leading separator when missing.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Find the stored path a delete request refers to.
pub fn resolve_delete_path<F>(path: &str, exists: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    let path = normalize_path(path);
    if path.len() > 1 && exists(&path) {
        return Some(path);
    }
    if path.contains(' ') {
        // `+` in a form value can arrive decoded as a space.
        let alt = path.replace(' ', "+");
        if exists(&alt) {
            return Some(alt);
        }
    }
    None
}

/// Validate a path against the flat root and return the bare file name.
pub fn file_name(path: &str) -> Result<&str, StorageError> {
    let name = path.strip_prefix('/').unwrap_or(path);
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(name)
}

/// MIME type for a path, by case-sensitive suffix.
pub fn content_type_for(path: &str) -> &'static str {
    const TYPES: &[(&[&str], &str)] = &[
        (&[".htm", ".html"], "text/html"),
        (&[".css"], "text/css"),
        (&[".js"], "application/javascript"),
        (&[".json"], "application/json"),
        (&[".txt", ".csv", ".ini"], "text/plain"),
        (&[".png"], "image/png"),
        (&[".gif"], "image/gif"),
        (&[".jpg", ".jpeg"], "image/jpeg"),
        (&[".ico"], "image/x-icon"),
        (&[".svg"], "image/svg+xml"),
    ];

    TYPES
        .iter()
        .find(|(suffixes, _)| suffixes.iter().any(|s| path.ends_with(s)))
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

/// Human-readable size with two decimals (`B`, `KB`, `MB`).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["B", "KB", "MB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
