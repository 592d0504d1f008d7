//! Line-oriented `key=value` record store.
//!
//! Records are small text files on the device filesystem, one `key=value` pair
//! per line. The store is not schema-aware: it hands back every well-formed
//! pair and leaves it to the caller to pick the keys it knows.
//!
//! # Format
//!
//! ```text
//! # comment lines and blank lines are skipped
//! mode=STA
//! ssid = HomeNetwork
//! ```
//!
//! Values cannot hold line breaks or leading/trailing whitespace, since the
//! parser would split or trim them. [`check_value`] is the gate for callers
//! and [`ConfigStore::save`] refuses such values outright.
//!
//! Writes go straight to the target file. There is no temp-file-then-rename
//! step, so a power loss mid-write can leave a torn record behind; loaders
//! fall back to defaults for anything they cannot read back.

use crate::storage::{FileStore, StorageError};
use log::{debug, warn};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on a record file. Anything larger is not one of ours.
pub const MAX_RECORD_BYTES: usize = 4096;

/// Errors from loading or saving a record.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists at the path.
    #[error("record not found: {0}")]
    NotFound(String),
    /// The record exists but could not be read.
    #[error("failed to read record {path}: {reason}")]
    Read { path: String, reason: String },
    /// The record could not be written.
    #[error("failed to write record {path}: {reason}")]
    Write { path: String, reason: String },
    /// A value would not survive a save/load cycle.
    #[error("record {path}: {source}")]
    Unstorable {
        path: String,
        #[source]
        source: UnstorableValue,
    },
}

/// A value that cannot be written as a single `key=value` line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} cannot contain line breaks or leading/trailing spaces")]
pub struct UnstorableValue {
    pub field: &'static str,
}

/// Check that `value` reads back unchanged after a save.
pub fn check_value(field: &'static str, value: &str) -> Result<(), UnstorableValue> {
    if value.contains(['\r', '\n']) || value.trim() != value {
        return Err(UnstorableValue { field });
    }
    Ok(())
}

/// A typed record persisted through the [`ConfigStore`].
pub trait Record {
    /// Well-known path of the record on the device filesystem.
    const PATH: &'static str;

    /// Fields in serialization order.
    fn entries(&self) -> Vec<(&'static str, &str)>;

    /// Overwrite fields from a parsed map, ignoring unknown keys.
    fn apply(&mut self, map: &HashMap<String, String>);
}

/// Parse record text into a key/value map.
///
/// Later duplicates of a key win.
pub fn parse(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), value.trim().to_string());
    }
    map
}

/// Serialize fields as `key=value\n` lines, in the given order.
pub fn serialize(entries: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Config record store backed by the device filesystem.
#[derive(Clone)]
pub struct ConfigStore {
    files: Arc<dyn FileStore>,
}

impl ConfigStore {
    /// Create a store writing records into `files`.
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }

    /// Load the raw key/value map at `path`.
    pub fn load(&self, path: &str) -> Result<HashMap<String, String>, StoreError> {
        let reader = self.files.open_read(path).map_err(|e| match e {
            StorageError::NotFound(_) => StoreError::NotFound(path.to_string()),
            other => StoreError::Read {
                path: path.to_string(),
                reason: other.to_string(),
            },
        })?;

        let mut bytes = Vec::new();
        reader
            .take(MAX_RECORD_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| StoreError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        if bytes.len() > MAX_RECORD_BYTES {
            return Err(StoreError::Read {
                path: path.to_string(),
                reason: format!("record exceeds {} bytes", MAX_RECORD_BYTES),
            });
        }

        // A torn write can leave invalid UTF-8 behind; keep what is readable.
        let text = String::from_utf8_lossy(&bytes);
        debug!("Loaded record {}", path);
        Ok(parse(&text))
    }

    /// Write `entries` to `path`, replacing any previous content.
    ///
    /// Nothing is written if any value fails [`check_value`].
    pub fn save(&self, path: &str, entries: &[(&'static str, &str)]) -> Result<(), StoreError> {
        let write_err = |reason: String| StoreError::Write {
            path: path.to_string(),
            reason,
        };
        for &(key, value) in entries {
            if let Err(source) = check_value(key, value) {
                return Err(StoreError::Unstorable {
                    path: path.to_string(),
                    source,
                });
            }
        }

        let mut writer = self
            .files
            .create(path)
            .map_err(|e| write_err(e.to_string()))?;
        writer
            .write_all(serialize(entries).as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| write_err(e.to_string()))?;

        debug!("Saved record {}", path);
        Ok(())
    }

    /// Load a typed record on top of `defaults`.
    ///
    /// A missing or unreadable record yields the defaults unchanged.
    pub fn load_record<R: Record>(&self, mut defaults: R) -> R {
        match self.load(R::PATH) {
            Ok(map) => defaults.apply(&map),
            Err(StoreError::NotFound(_)) => {
                debug!("No record at {}, using defaults", R::PATH);
            }
            Err(e) => warn!("{}; using defaults", e),
        }
        defaults
    }

    /// Persist a typed record at its well-known path.
    pub fn save_record<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        self.save(R::PATH, &record.entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFileStore;

    fn store() -> (Arc<MemoryFileStore>, ConfigStore) {
        let files = Arc::new(MemoryFileStore::new());
        let store = ConfigStore::new(files.clone());
        (files, store)
    }

    // ==================== Parser Tests ====================

    #[test]
    fn test_parse_simple_pairs() {
        let map = parse("mode=STA\nssid=Home\n");
        assert_eq!(map.len(), 2);
        assert_eq!(map["mode"], "STA");
        assert_eq!(map["ssid"], "Home");
    }

    #[test]
    fn test_parse_ignores_noise() {
        let text = "\n# comment\n   # indented comment\nmode=AP\nno equals here\n=orphan\n  \napSsid = Lab AP \n";
        let map = parse(text);
        assert_eq!(map.len(), 2);
        assert_eq!(map["mode"], "AP");
        assert_eq!(map["apSsid"], "Lab AP");
    }

    #[test]
    fn test_parse_splits_on_first_equals() {
        let map = parse("pass=a=b=c");
        assert_eq!(map["pass"], "a=b=c");
    }

    #[test]
    fn test_parse_empty_value() {
        let map = parse("pass=\n");
        assert_eq!(map["pass"], "");
    }

    #[test]
    fn test_parse_crlf_lines() {
        let map = parse("user=bob\r\npass=abcd\r\n");
        assert_eq!(map["user"], "bob");
        assert_eq!(map["pass"], "abcd");
    }

    #[test]
    fn test_parse_last_duplicate_wins() {
        let map = parse("mode=STA\nmode=AP\n");
        assert_eq!(map["mode"], "AP");
    }

    #[test]
    fn test_serialize_fixed_order() {
        let text = serialize(&[("b", "2"), ("a", "1")]);
        assert_eq!(text, "b=2\na=1\n");
    }

    // ==================== Store Tests ====================

    #[test]
    fn test_load_missing_is_not_found() {
        let (_, store) = store();
        assert!(matches!(
            store.load("/missing.cfg"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let (files, store) = store();
        store
            .save("/test.cfg", &[("user", "bob"), ("pass", "abcd")])
            .unwrap();
        assert_eq!(
            files.contents("/test.cfg").unwrap(),
            b"user=bob\npass=abcd\n".to_vec()
        );

        let map = store.load("/test.cfg").unwrap();
        assert_eq!(map["user"], "bob");
        assert_eq!(map["pass"], "abcd");
    }

    #[test]
    fn test_save_reports_write_error() {
        let (files, store) = store();
        files.set_fail_writes(true);
        let result = store.save("/test.cfg", &[("user", "bob")]);
        assert!(matches!(result, Err(StoreError::Write { .. })));
    }

    #[test]
    fn test_check_value() {
        assert!(check_value("pass", "a b=c#d").is_ok());
        assert!(check_value("pass", "").is_ok());
        assert_eq!(
            check_value("pass", "ab\nuser=eve"),
            Err(UnstorableValue { field: "pass" })
        );
        assert!(check_value("pass", "ab\rcd").is_err());
        assert!(check_value("ssid", " Home").is_err());
        assert!(check_value("ssid", "Home\t").is_err());
    }

    #[test]
    fn test_save_refuses_unstorable_value() {
        let (files, store) = store();
        store
            .save("/test.cfg", &[("user", "bob"), ("pass", "abcd")])
            .unwrap();

        let result = store.save("/test.cfg", &[("user", "bob"), ("pass", "ab\nuser=eve")]);
        assert!(matches!(
            result,
            Err(StoreError::Unstorable { ref source, .. }) if source.field == "pass"
        ));
        // The previous record is left alone.
        assert_eq!(
            files.contents("/test.cfg").unwrap(),
            b"user=bob\npass=abcd\n".to_vec()
        );
    }

    #[test]
    fn test_load_torn_record_keeps_readable_lines() {
        let (files, store) = store();
        files.insert("/torn.cfg", b"user=bob\npass=ab\xff\xfe".to_vec());
        let map = store.load("/torn.cfg").unwrap();
        assert_eq!(map["user"], "bob");
        assert!(map.contains_key("pass"));
    }

    #[test]
    fn test_load_oversized_record_rejected() {
        let (files, store) = store();
        files.insert("/big.cfg", vec![b'x'; MAX_RECORD_BYTES + 1]);
        assert!(matches!(
            store.load("/big.cfg"),
            Err(StoreError::Read { .. })
        ));
    }
}
