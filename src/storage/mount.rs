//! Storage mount at startup.
//!
//! - **ESP32**: registers the SPIFFS partition with the ESP-IDF VFS at the
//!   configured root, optionally formatting it if mounting fails.
//! - **Host**: makes sure the root directory exists.
//!
//! Either way the result is a [`DirFileStore`] over the mounted root. A mount
//! failure is fatal to startup.

use super::DirFileStore;
use crate::config::Settings;
use log::{error, info};
use thiserror::Error;

/// Storage could not be made available.
#[derive(Debug, Error)]
pub enum MountError {
    /// The root directory could not be created or opened.
    #[error("storage root {root} unavailable: {reason}")]
    Unavailable { root: String, reason: String },
    /// The flash partition could not be mounted.
    #[error("failed to mount storage partition at {root} (error {code})")]
    Partition { root: String, code: i32 },
}

/// Mount the device filesystem described by `settings`.
#[cfg(not(feature = "esp32"))]
pub fn mount(settings: &Settings) -> Result<DirFileStore, MountError> {
    let root = &settings.storage_root;
    if let Err(e) = std::fs::create_dir_all(root) {
        error!("Storage mount FAILED at {:?}: {}", root, e);
        return Err(MountError::Unavailable {
            root: root.display().to_string(),
            reason: e.to_string(),
        });
    }
    if !root.is_dir() {
        return Err(MountError::Unavailable {
            root: root.display().to_string(),
            reason: "not a directory".to_string(),
        });
    }
    info!("Storage mounted at {:?}", root);
    Ok(DirFileStore::new(root.clone()))
}

/// Maximum simultaneously open files on the SPIFFS partition.
#[cfg(feature = "esp32")]
const SPIFFS_MAX_FILES: usize = 8;

/// Mount the device filesystem described by `settings`.
#[cfg(feature = "esp32")]
pub fn mount(settings: &Settings) -> Result<DirFileStore, MountError> {
    use esp_idf_sys::{esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register, EspError};
    use std::ffi::CString;

    let root = settings.storage_root.display().to_string();
    let base_path = CString::new(root.clone()).map_err(|_| MountError::Unavailable {
        root: root.clone(),
        reason: "mount point contains NUL".to_string(),
    })?;

    let conf = esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: std::ptr::null(),
        max_files: SPIFFS_MAX_FILES,
        format_if_mount_failed: settings.format_if_mount_fails,
    };

    // SAFETY: `conf` and the `base_path` string it points to outlive the call;
    // ESP-IDF copies the base path into its own VFS table.
    let result = EspError::convert(unsafe { esp_vfs_spiffs_register(&conf) });
    if let Err(e) = result {
        error!("SPIFFS mount FAILED at {}: {:?}", root, e);
        return Err(MountError::Partition {
            root,
            code: e.code(),
        });
    }

    info!("SPIFFS mounted at {}", root);
    Ok(DirFileStore::new(settings.storage_root.clone()))
}
