//! Persisted network configuration.
//!
//! The record holds both the station (client) credentials and the access
//! point credentials, plus the mode the device should come up in.

use super::kv::{check_value, Record, UnstorableValue};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Well-known path of the network record.
pub const NETWORK_CONFIG_PATH: &str = "/network.cfg";

/// Which side of the radio is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum NetworkMode {
    /// Client joining an existing network.
    #[serde(rename = "STA")]
    Sta,
    /// Self-hosted access point.
    #[default]
    #[serde(rename = "AP")]
    Ap,
}

impl NetworkMode {
    /// Wire/record representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sta => "STA",
            Self::Ap => "AP",
        }
    }

    /// Parse a mode, coercing anything unrecognised to [`NetworkMode::Ap`].
    pub fn parse_or_ap(s: &str) -> Self {
        s.parse().unwrap_or(Self::Ap)
    }
}

impl FromStr for NetworkMode {
    type Err = UnknownMode;

    /// Case-sensitive: only `STA` and `AP` are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STA" => Ok(Self::Sta),
            "AP" => Ok(Self::Ap),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mode string that is neither `STA` nor `AP`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network mode: {0}")]
pub struct UnknownMode(pub String);

/// Access point credentials used when the record leaves them empty.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ApDefaults {
    pub ssid: String,
    pub passphrase: String,
}

/// Network configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NetworkConfig {
    #[zeroize(skip)]
    pub mode: NetworkMode,
    pub station_ssid: String,
    pub station_passphrase: String,
    pub ap_ssid: String,
    pub ap_passphrase: String,
}

impl NetworkConfig {
    /// Initial record for a device that has never been configured.
    pub fn with_defaults(defaults: &ApDefaults) -> Self {
        Self {
            mode: NetworkMode::Ap,
            station_ssid: String::new(),
            station_passphrase: String::new(),
            ap_ssid: defaults.ssid.clone(),
            ap_passphrase: defaults.passphrase.clone(),
        }
    }

    /// Whether a station join should be attempted.
    ///
    /// `STA` without an SSID behaves as AP-only.
    pub fn wants_station(&self) -> bool {
        self.mode == NetworkMode::Sta && !self.station_ssid.is_empty()
    }

    /// Fill empty AP credentials from `defaults`.
    ///
    /// Returns `true` if anything changed.
    pub fn fill_ap_defaults(&mut self, defaults: &ApDefaults) -> bool {
        let mut changed = false;
        if self.ap_ssid.is_empty() {
            self.ap_ssid = defaults.ssid.clone();
            changed = true;
        }
        if self.ap_passphrase.is_empty() {
            self.ap_passphrase = defaults.passphrase.clone();
            changed = true;
        }
        changed
    }

    /// Apply a management form submission.
    ///
    /// Empty SSIDs keep the stored value; passphrases are always taken as
    /// submitted, including empty.
    pub fn apply_update(&mut self, update: &NetworkUpdate) {
        self.mode = update.mode;
        if !update.ssid.is_empty() {
            self.station_ssid = update.ssid.clone();
        }
        self.station_passphrase = update.pass.clone();
        if !update.ap_ssid.is_empty() {
            self.ap_ssid = update.ap_ssid.clone();
        }
        self.ap_passphrase = update.ap_pass.clone();
    }
}

impl Record for NetworkConfig {
    const PATH: &'static str = NETWORK_CONFIG_PATH;

    fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("mode", self.mode.as_str()),
            ("ssid", &self.station_ssid),
            ("pass", &self.station_passphrase),
            ("apSsid", &self.ap_ssid),
            ("apPass", &self.ap_passphrase),
        ]
    }

    fn apply(&mut self, map: &HashMap<String, String>) {
        for (key, value) in map {
            match key.as_str() {
                "mode" => self.mode = NetworkMode::parse_or_ap(value),
                "ssid" => self.station_ssid = value.clone(),
                "pass" => self.station_passphrase = value.clone(),
                "apSsid" => self.ap_ssid = value.clone(),
                "apPass" => self.ap_passphrase = value.clone(),
                _ => {}
            }
        }
    }
}

/// Network settings submitted through the management API.
#[derive(Debug, Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
pub struct NetworkUpdate {
    #[zeroize(skip)]
    pub mode: NetworkMode,
    pub ssid: String,
    pub pass: String,
    pub ap_ssid: String,
    pub ap_pass: String,
}

impl NetworkUpdate {
    /// Build an update from raw form fields. Every field is trimmed and an
    /// unknown mode becomes `AP`.
    pub fn from_fields(mode: &str, ssid: &str, pass: &str, ap_ssid: &str, ap_pass: &str) -> Self {
        Self {
            mode: NetworkMode::parse_or_ap(mode.trim()),
            ssid: ssid.trim().to_string(),
            pass: pass.trim().to_string(),
            ap_ssid: ap_ssid.trim().to_string(),
            ap_pass: ap_pass.trim().to_string(),
        }
    }

    /// Check that every field can be stored in the network record.
    pub fn validate(&self) -> Result<(), UnstorableValue> {
        check_value("ssid", &self.ssid)?;
        check_value("pass", &self.pass)?;
        check_value("apSsid", &self.ap_ssid)?;
        check_value("apPass", &self.ap_pass)
    }
}
