//! Persisted configuration and runtime settings.
//!
//! # Components
//!
//! - [`kv`] - line-oriented `key=value` record store
//! - [`network`] - network mode and credential record
//! - [`settings`] - runtime settings (ports, defaults, storage root)

pub mod kv;
pub mod network;
pub mod settings;

pub use kv::{check_value, ConfigStore, Record, StoreError, UnstorableValue};
pub use network::{
    ApDefaults, NetworkConfig, NetworkMode, NetworkUpdate, UnknownMode, NETWORK_CONFIG_PATH,
};
pub use settings::Settings;
