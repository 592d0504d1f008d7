//! Scriptable radio for tests.

use super::{NetworkError, WifiDriver};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Radio {
    /// Polls before the station comes up; `None` never joins.
    join_after: Option<u32>,
    polls: u32,
    joined: bool,
    reject_station: bool,
    fail_access_point: bool,
    station_attempts: u32,
    access_point_starts: u32,
    last_station: Option<(String, String)>,
    last_access_point: Option<(String, String)>,
    ap_running: bool,
    advertised: Option<(String, u16)>,
}

/// Radio whose behaviour is set by the test. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeWifi {
    radio: Arc<Mutex<Radio>>,
}

impl FakeWifi {
    pub const STATION_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
    pub const ACCESS_POINT_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
    pub const RSSI: i8 = -61;

    /// Radio that never joins a station network.
    pub fn new() -> Self {
        Self::default()
    }

    fn radio(&self) -> MutexGuard<'_, Radio> {
        self.radio.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join after `polls` unsuccessful link checks.
    pub fn join_after_polls(&self, polls: u32) {
        self.radio().join_after = Some(polls);
    }

    pub fn reject_station(&self, reject: bool) {
        self.radio().reject_station = reject;
    }

    pub fn fail_access_point(&self, fail: bool) {
        self.radio().fail_access_point = fail;
    }

    pub fn station_attempts(&self) -> u32 {
        self.radio().station_attempts
    }

    pub fn access_point_starts(&self) -> u32 {
        self.radio().access_point_starts
    }

    pub fn last_station(&self) -> Option<(String, String)> {
        self.radio().last_station.clone()
    }

    pub fn last_access_point(&self) -> Option<(String, String)> {
        self.radio().last_access_point.clone()
    }

    pub fn advertised(&self) -> Option<(String, u16)> {
        self.radio().advertised.clone()
    }
}

impl WifiDriver for FakeWifi {
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError> {
        let mut radio = self.radio();
        radio.station_attempts += 1;
        radio.last_station = Some((ssid.to_string(), passphrase.to_string()));
        radio.ap_running = false;
        radio.joined = false;
        radio.polls = 0;
        if radio.reject_station {
            return Err(NetworkError::Driver("join rejected".into()));
        }
        Ok(())
    }

    fn is_station_connected(&self) -> bool {
        let mut radio = self.radio();
        if radio.joined {
            return true;
        }
        match radio.join_after {
            Some(after) if radio.polls >= after => {
                radio.joined = true;
                true
            }
            _ => {
                radio.polls += 1;
                false
            }
        }
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        self.radio().joined.then_some(Self::STATION_IP)
    }

    fn rssi(&self) -> Option<i8> {
        self.radio().joined.then_some(Self::RSSI)
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<Ipv4Addr, NetworkError> {
        let mut radio = self.radio();
        radio.access_point_starts += 1;
        radio.last_access_point = Some((ssid.to_string(), passphrase.to_string()));
        radio.joined = false;
        if radio.fail_access_point {
            radio.ap_running = false;
            return Err(NetworkError::Driver("softAP failed".into()));
        }
        radio.ap_running = true;
        Ok(Self::ACCESS_POINT_IP)
    }

    fn access_point_ip(&self) -> Option<Ipv4Addr> {
        self.radio().ap_running.then_some(Self::ACCESS_POINT_IP)
    }

    fn advertise(&mut self, hostname: &str, port: u16) -> Result<(), NetworkError> {
        self.radio().advertised = Some((hostname.to_string(), port));
        Ok(())
    }
}
