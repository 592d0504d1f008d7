//! Network connectivity.
//!
//! This module provides the radio abstraction and the connectivity state
//! machine built on it:
//! - **ESP32** (`esp32` feature): [`EspWifiDriver`] over the ESP-IDF WiFi driver
//! - **Host**: [`HostWifi`], where the OS network stands in for the station
//!
//! # Example
//!
//! ```ignore
//! use device_portal::network::{ConnectivityController, HostWifi};
//!
//! let mut controller = ConnectivityController::new(Box::new(HostWifi::new()), store, &settings);
//! let report = controller.start().await;
//! println!("Mode {}, IP {:?}", report.outcome.mode, report.outcome.ip);
//! ```

use std::net::Ipv4Addr;
use thiserror::Error;

mod controller;
#[cfg(test)]
pub(crate) mod fake;
mod host;
#[cfg(feature = "esp32")]
mod wifi;

pub use controller::{
    ConnectTiming, ConnectionOutcome, ConnectivityController, LinkState, NetworkStatus,
    TransitionReport,
};
pub use host::HostWifi;
#[cfg(feature = "esp32")]
pub use wifi::EspWifiDriver;

/// Radio driver abstraction.
///
/// Station joins are non-blocking: [`WifiDriver::begin_station`] issues the
/// join and the controller polls [`WifiDriver::is_station_connected`] until
/// it succeeds or the timeout runs out.
pub trait WifiDriver: Send {
    /// Switch to station mode and start joining `ssid`.
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError>;

    /// Whether the station join has completed (associated and addressed).
    fn is_station_connected(&self) -> bool;

    /// Station IP address, if connected.
    fn station_ip(&self) -> Option<Ipv4Addr>;

    /// Signal strength of the joined network in dBm.
    fn rssi(&self) -> Option<i8>;

    /// Switch to access point mode hosting `ssid`.
    ///
    /// Returns the access point's own address.
    fn start_access_point(&mut self, ssid: &str, passphrase: &str)
        -> Result<Ipv4Addr, NetworkError>;

    /// Access point address, if running.
    fn access_point_ip(&self) -> Option<Ipv4Addr>;

    /// Advertise `<hostname>.local` with an HTTP service on `port`.
    fn advertise(&mut self, hostname: &str, port: u16) -> Result<(), NetworkError> {
        let _ = (hostname, port);
        Ok(())
    }
}

/// Radio errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// SSID is empty or too long for the driver.
    #[error("invalid SSID")]
    InvalidSsid,
    /// Passphrase is too long for the driver.
    #[error("invalid passphrase")]
    InvalidPassphrase,
    /// The driver rejected the request.
    #[error("driver error: {0}")]
    Driver(String),
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for NetworkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Driver(format!("{:?}", e))
    }
}
