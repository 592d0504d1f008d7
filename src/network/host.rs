//! Host radio.
//!
//! On host systems the OS owns networking. A station join "succeeds"
//! immediately on whatever network the host is on, and AP mode serves on the
//! loopback interface. This lets the full portal run on a development machine.

use super::{NetworkError, WifiDriver};
use log::info;
use std::net::{IpAddr, Ipv4Addr};

/// Longest SSID accepted by 802.11.
const MAX_SSID_LEN: usize = 32;

/// Longest WPA2 passphrase.
const MAX_PASSPHRASE_LEN: usize = 63;

/// Host radio stand-in.
pub struct HostWifi {
    station: Option<Ipv4Addr>,
    access_point: bool,
}

impl HostWifi {
    /// Create a radio with no link up.
    pub fn new() -> Self {
        Self {
            station: None,
            access_point: false,
        }
    }

    /// Get the primary local IPv4 address.
    ///
    /// Creates a UDP socket and "connects" it to a public address (nothing is
    /// sent), then checks which local address the OS picked for the route.
    fn detect_local_ip() -> Option<Ipv4Addr> {
        use std::net::UdpSocket;

        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    }
}

impl Default for HostWifi {
    fn default() -> Self {
        Self::new()
    }
}

fn check_credentials(ssid: &str, passphrase: &str) -> Result<(), NetworkError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
        return Err(NetworkError::InvalidSsid);
    }
    if passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(NetworkError::InvalidPassphrase);
    }
    Ok(())
}

impl WifiDriver for HostWifi {
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError> {
        check_credentials(ssid, passphrase)?;
        self.access_point = false;
        // Without a default route the host still serves on loopback.
        let ip = Self::detect_local_ip().unwrap_or(Ipv4Addr::LOCALHOST);
        info!("Host network stands in for \"{}\", local IP: {}", ssid, ip);
        self.station = Some(ip);
        Ok(())
    }

    fn is_station_connected(&self) -> bool {
        self.station.is_some()
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        self.station
    }

    fn rssi(&self) -> Option<i8> {
        None
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<Ipv4Addr, NetworkError> {
        check_credentials(ssid, passphrase)?;
        self.station = None;
        self.access_point = true;
        info!("Host AP \"{}\" on loopback", ssid);
        Ok(Ipv4Addr::LOCALHOST)
    }

    fn access_point_ip(&self) -> Option<Ipv4Addr> {
        self.access_point.then_some(Ipv4Addr::LOCALHOST)
    }
}
