//! Device portal library.
//!
//! Keeps a WiFi-capable device reachable and manageable: it joins a
//! configured network or falls back to its own access point, and serves a
//! small management API for browsing, uploading and deleting files and for
//! changing the network and login settings. Settings persist as flat
//! `key=value` records on the device filesystem.
//!
//! Everything except the radio and the flash mount is platform independent
//! and tested on the host.

pub mod api;
pub mod auth;
pub mod config;
pub mod device;
pub mod network;
pub mod storage;

// Re-export commonly used items
pub use api::server::PortalServer;
pub use api::{ApiRequest, ApiResponse, ManagementApi};
pub use auth::{AuthRecord, CredentialGate, ValidationError};
pub use config::{ConfigStore, NetworkConfig, NetworkMode, NetworkUpdate, Settings, StoreError};
pub use device::{Device, DeviceStatus, Startup};
pub use network::{
    ConnectionOutcome, ConnectivityController, HostWifi, LinkState, NetworkError, WifiDriver,
};
pub use storage::{DirFileStore, FileStore, MemoryFileStore, MountError, StorageError};
