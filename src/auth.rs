//! Management API credentials.
//!
//! A single shared username/password pair gates file and configuration
//! mutations. Comparison is plain byte equality (not constant-time, not
//! hashed) and the pair is stored as plaintext in the auth record.

use crate::config::kv::{check_value, ConfigStore, Record, StoreError, UnstorableValue};
use log::{info, warn};
use std::collections::HashMap;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Well-known path of the auth record.
pub const AUTH_CONFIG_PATH: &str = "/auth.cfg";

/// Built-in username.
pub const DEFAULT_USERNAME: &str = "files";

/// Built-in password.
pub const DEFAULT_PASSWORD: &str = "files123";

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 4;

/// Credential pair.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthRecord {
    pub username: String,
    pub password: String,
}

impl AuthRecord {
    /// Create a record from a pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The built-in pair.
    pub fn builtin() -> Self {
        Self::new(DEFAULT_USERNAME, DEFAULT_PASSWORD)
    }

    fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for AuthRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRecord")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

impl Record for AuthRecord {
    const PATH: &'static str = AUTH_CONFIG_PATH;

    fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![("user", &self.username), ("pass", &self.password)]
    }

    fn apply(&mut self, map: &HashMap<String, String>) {
        if let Some(user) = map.get("user") {
            self.username = user.clone();
        }
        if let Some(pass) = map.get("pass") {
            self.password = pass.clone();
        }
    }
}

/// Rejected credential change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Username is empty.
    #[error("username cannot be empty")]
    EmptyUsername,
    /// Password is below the minimum length.
    #[error("password must be at least {min} characters")]
    PasswordTooShort { len: usize, min: usize },
    /// A field would not read back unchanged from the auth record.
    #[error(transparent)]
    Unstorable(#[from] UnstorableValue),
}

/// Outcome of a successful [`CredentialGate::change`].
#[derive(Debug)]
pub struct ChangeReport {
    /// Result of persisting the new pair. The in-memory pair is updated
    /// regardless.
    pub persisted: Result<(), StoreError>,
}

/// Decides whether a management request is authorized.
pub struct CredentialGate {
    record: AuthRecord,
    defaults: AuthRecord,
    store: ConfigStore,
}

impl CredentialGate {
    /// Load the persisted pair, falling back to `defaults`.
    pub fn load(store: ConfigStore, defaults: AuthRecord) -> Self {
        let record = store.load_record(defaults.clone());
        let mut gate = Self {
            record,
            defaults,
            store,
        };
        gate.ensure_non_empty();
        gate
    }

    /// Current username.
    pub fn username(&self) -> &str {
        &self.record.username
    }

    /// Current pair.
    pub fn record(&self) -> &AuthRecord {
        &self.record
    }

    /// Reset both fields to the built-in pair if either is empty.
    ///
    /// Returns `true` if a reset happened. Not persisted: an emptied record on
    /// disk is normalized again on the next load.
    pub fn ensure_non_empty(&mut self) -> bool {
        if self.record.is_complete() {
            return false;
        }
        warn!("Auth record incomplete, restoring built-in credentials");
        self.record = self.defaults.clone();
        true
    }

    /// Check supplied credentials against the stored pair.
    pub fn authorize(&mut self, user: &str, pass: &str) -> bool {
        self.ensure_non_empty();
        self.record.username.as_bytes() == user.as_bytes()
            && self.record.password.as_bytes() == pass.as_bytes()
    }

    /// Replace the pair after validation and persist it.
    pub fn change(&mut self, user: &str, pass: &str) -> Result<ChangeReport, ValidationError> {
        if user.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        let len = pass.chars().count();
        if len < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort {
                len,
                min: MIN_PASSWORD_LEN,
            });
        }
        check_value("username", user)?;
        check_value("password", pass)?;

        self.record = AuthRecord::new(user, pass);
        let persisted = self.store.save_record(&self.record);
        match &persisted {
            Ok(()) => info!("Management credentials changed for user '{}'", user),
            Err(e) => warn!("Credentials changed but not persisted: {}", e),
        }
        Ok(ChangeReport { persisted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFileStore;
    use std::sync::Arc;

    fn gate() -> (Arc<MemoryFileStore>, CredentialGate) {
        let files = Arc::new(MemoryFileStore::new());
        let gate = CredentialGate::load(ConfigStore::new(files.clone()), AuthRecord::builtin());
        (files, gate)
    }

    // ==================== Load Tests ====================

    #[test]
    fn test_missing_record_uses_builtin() {
        let (_, mut gate) = gate();
        assert_eq!(gate.username(), "files");
        assert!(gate.authorize("files", "files123"));
    }

    #[test]
    fn test_loads_persisted_pair() {
        let files = Arc::new(MemoryFileStore::new());
        files.insert(AUTH_CONFIG_PATH, b"user=admin\npass=secret\n".to_vec());
        let mut gate = CredentialGate::load(ConfigStore::new(files), AuthRecord::builtin());
        assert!(gate.authorize("admin", "secret"));
        assert!(!gate.authorize("files", "files123"));
    }

    #[test]
    fn test_empty_persisted_field_resets_both() {
        let files = Arc::new(MemoryFileStore::new());
        files.insert(AUTH_CONFIG_PATH, b"user=admin\npass=\n".to_vec());
        let gate = CredentialGate::load(ConfigStore::new(files), AuthRecord::builtin());
        assert_eq!(gate.record(), &AuthRecord::builtin());
    }

    // ==================== ensure_non_empty Tests ====================

    #[test]
    fn test_ensure_non_empty_idempotent() {
        let (_, mut gate) = gate();
        gate.record = AuthRecord::new("", "x");
        assert!(gate.ensure_non_empty());
        let once = gate.record().clone();
        assert!(!gate.ensure_non_empty());
        assert_eq!(gate.record(), &once);
    }

    // ==================== authorize Tests ====================

    #[test]
    fn test_authorize_is_exact() {
        let (_, mut gate) = gate();
        assert!(!gate.authorize("Files", "files123"));
        assert!(!gate.authorize("files", "files123 "));
        assert!(!gate.authorize("", ""));
    }

    #[test]
    fn test_change_switches_pair() {
        let (_, mut gate) = gate();
        gate.change("bob", "abcd").unwrap().persisted.unwrap();
        assert!(gate.authorize("bob", "abcd"));
        assert!(!gate.authorize("files", "files123"));
    }

    // ==================== change Tests ====================

    #[test]
    fn test_change_validation() {
        let (_, mut gate) = gate();
        assert_eq!(
            gate.change("", "abcd").unwrap_err(),
            ValidationError::EmptyUsername
        );
        assert_eq!(
            gate.change("bob", "ab").unwrap_err(),
            ValidationError::PasswordTooShort { len: 2, min: 4 }
        );
        assert!(gate.change("bob", "abcd").is_ok());
    }

    #[test]
    fn test_change_rejects_line_breaks() {
        let (files, mut gate) = gate();
        assert_eq!(
            gate.change("bob", "ab\nuser=eve").unwrap_err(),
            ValidationError::Unstorable(UnstorableValue { field: "password" })
        );
        assert_eq!(
            gate.change("bob\r", "abcd").unwrap_err(),
            ValidationError::Unstorable(UnstorableValue { field: "username" })
        );
        assert!(gate.change(" bob", "abcd").is_err());
        assert!(gate.change("bob", "abcd ").is_err());

        // Nothing changed in memory or on disk.
        assert!(gate.authorize("files", "files123"));
        assert!(files.contents(AUTH_CONFIG_PATH).is_none());
    }

    #[test]
    fn test_changed_pair_survives_reload() {
        let (files, mut gate) = gate();
        gate.change("bob smith", "pa ss=#word").unwrap().persisted.unwrap();

        let mut reloaded =
            CredentialGate::load(ConfigStore::new(files.clone()), AuthRecord::builtin());
        assert_eq!(reloaded.record(), gate.record());
        assert!(reloaded.authorize("bob smith", "pa ss=#word"));
    }

    #[test]
    fn test_change_persists() {
        let (files, mut gate) = gate();
        gate.change("bob", "abcd").unwrap();
        assert_eq!(
            files.contents(AUTH_CONFIG_PATH).unwrap(),
            b"user=bob\npass=abcd\n".to_vec()
        );

        let mut reloaded =
            CredentialGate::load(ConfigStore::new(files.clone()), AuthRecord::builtin());
        assert!(reloaded.authorize("bob", "abcd"));
    }

    #[test]
    fn test_change_write_failure_reported() {
        let (files, mut gate) = gate();
        files.set_fail_writes(true);
        let report = gate.change("bob", "abcd").unwrap();
        assert!(report.persisted.is_err());
        // In-memory state stays authoritative.
        assert!(gate.authorize("bob", "abcd"));
    }

    #[test]
    fn test_record_debug_hides_password() {
        let debug = format!("{:?}", AuthRecord::new("bob", "abcd"));
        assert!(debug.contains("bob"));
        assert!(!debug.contains("abcd"));
    }
}
