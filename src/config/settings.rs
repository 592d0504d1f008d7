//! Runtime settings for the portal.
//!
//! Values come from the environment: at runtime on host builds, at compile
//! time (`option_env!`) on ESP32 where there is no process environment.
//!
//! | Variable         | Meaning                         | Host default            | ESP32 default |
//! |------------------|---------------------------------|-------------------------|---------------|
//! | `PORTAL_ROOT`    | storage root directory          | `~/.device-portal/fs`   | `/spiffs`     |
//! | `PORTAL_PORT`    | HTTP port                       | `8080`                  | `80`          |
//! | `PORTAL_MDNS`    | mDNS hostname (without `.local`)| `esp32fs`               | `esp32fs`     |
//! | `PORTAL_AP_SSID` | default AP SSID                 | `ESP32_AP`              | `ESP32_AP`    |
//! | `PORTAL_AP_PASS` | default AP passphrase           | `12345678`              | `12345678`    |

use super::network::ApDefaults;
use crate::auth::AuthRecord;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

/// Default AP SSID.
pub const DEFAULT_AP_SSID: &str = "ESP32_AP";

/// Default AP passphrase.
pub const DEFAULT_AP_PASSPHRASE: &str = "12345678";

/// Default mDNS hostname.
pub const DEFAULT_MDNS_HOSTNAME: &str = "esp32fs";

/// Default HTTP port on host builds.
pub const DEFAULT_HOST_PORT: u16 = 8080;

/// Default HTTP port on the device.
pub const DEFAULT_DEVICE_PORT: u16 = 80;

/// SPIFFS mount point on the device.
pub const DEVICE_STORAGE_ROOT: &str = "/spiffs";

/// How long a station join may take before falling back to AP.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between station status polls.
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Portal settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the device filesystem.
    pub storage_root: PathBuf,
    /// Format the storage partition if mounting fails.
    pub format_if_mount_fails: bool,
    /// HTTP port for the management API.
    pub http_port: u16,
    /// mDNS hostname, advertised as `<hostname>.local`.
    pub mdns_hostname: String,
    /// AP credentials used when the network record has none.
    pub ap_defaults: ApDefaults,
    /// Built-in credential pair for the management API.
    pub auth_defaults: AuthRecord,
    /// Station join timeout.
    pub connect_timeout: Duration,
    /// Station status poll interval.
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEVICE_STORAGE_ROOT),
            format_if_mount_fails: true,
            http_port: DEFAULT_DEVICE_PORT,
            mdns_hostname: DEFAULT_MDNS_HOSTNAME.to_string(),
            ap_defaults: ApDefaults {
                ssid: DEFAULT_AP_SSID.to_string(),
                passphrase: DEFAULT_AP_PASSPHRASE.to_string(),
            },
            auth_defaults: AuthRecord::builtin(),
            connect_timeout: CONNECT_TIMEOUT,
            poll_interval: CONNECT_POLL_INTERVAL,
        }
    }
}

impl Settings {
    /// Build settings from a variable lookup on top of `base`.
    ///
    /// Empty values are treated as unset. An unparsable port is logged and
    /// ignored.
    pub fn from_lookup<F>(mut base: Settings, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(root) = get("PORTAL_ROOT") {
            base.storage_root = PathBuf::from(root);
        }
        if let Some(port) = get("PORTAL_PORT") {
            match port.parse() {
                Ok(port) => base.http_port = port,
                Err(_) => warn!("Ignoring invalid PORTAL_PORT '{}'", port),
            }
        }
        if let Some(hostname) = get("PORTAL_MDNS") {
            base.mdns_hostname = hostname;
        }
        if let Some(ssid) = get("PORTAL_AP_SSID") {
            base.ap_defaults.ssid = ssid;
        }
        if let Some(pass) = get("PORTAL_AP_PASS") {
            base.ap_defaults.passphrase = pass;
        }
        base
    }

    /// Settings for host (development) builds, read from the process environment.
    #[cfg(not(feature = "esp32"))]
    pub fn from_env() -> Self {
        let base = Settings {
            storage_root: default_host_root(),
            http_port: DEFAULT_HOST_PORT,
            ..Settings::default()
        };
        Self::from_lookup(base, |key| std::env::var(key).ok())
    }

    /// Settings for the device, baked in at compile time.
    #[cfg(feature = "esp32")]
    pub fn from_env() -> Self {
        const ROOT: Option<&str> = option_env!("PORTAL_ROOT");
        const PORT: Option<&str> = option_env!("PORTAL_PORT");
        const MDNS: Option<&str> = option_env!("PORTAL_MDNS");
        const AP_SSID: Option<&str> = option_env!("PORTAL_AP_SSID");
        const AP_PASS: Option<&str> = option_env!("PORTAL_AP_PASS");

        Self::from_lookup(Settings::default(), |key| {
            let value = match key {
                "PORTAL_ROOT" => ROOT,
                "PORTAL_PORT" => PORT,
                "PORTAL_MDNS" => MDNS,
                "PORTAL_AP_SSID" => AP_SSID,
                "PORTAL_AP_PASS" => AP_PASS,
                _ => None,
            };
            value.map(str::to_string)
        })
    }

    /// Fully qualified mDNS name.
    pub fn mdns_name(&self) -> String {
        format!("{}.local", self.mdns_hostname)
    }
}

/// Host storage root: `~/.device-portal/fs`, or a temp directory without `HOME`.
#[cfg(not(feature = "esp32"))]
fn default_host_root() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".device-portal").join("fs"),
        Err(_) => std::env::temp_dir().join("device-portal").join("fs"),
    }
}
