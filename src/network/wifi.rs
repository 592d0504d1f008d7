//! ESP32 radio.
//!
//! Wraps the ESP-IDF WiFi driver. Station joins are issued with the
//! non-blocking `connect` so the controller can poll the link itself.

use super::{NetworkError, WifiDriver};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use esp_idf_sys::{esp_wifi_sta_get_ap_info, wifi_ap_record_t, EspError, ESP_OK};
use log::{info, warn};
use std::net::Ipv4Addr;

/// Channel the access point is hosted on.
const AP_CHANNEL: u8 = 1;

/// Maximum stations on the access point.
const AP_MAX_CONNECTIONS: u16 = 4;

/// ESP-IDF WiFi driver.
pub struct EspWifiDriver {
    wifi: EspWifi<'static>,
    mdns: Option<EspMdns>,
    ap_running: bool,
}

impl EspWifiDriver {
    /// Take the modem and create the driver. The radio stays off until a
    /// mode is requested.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, EspError> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self {
            wifi,
            mdns: None,
            ap_running: false,
        })
    }

    fn reconfigure(&mut self, config: &Configuration) -> Result<(), NetworkError> {
        self.ap_running = false;
        if self.wifi.is_started()? {
            // Not connected is fine here.
            let _ = self.wifi.disconnect();
            self.wifi.stop()?;
        }
        self.wifi.set_configuration(config)?;
        self.wifi.start()?;
        Ok(())
    }
}

fn auth_method(passphrase: &str) -> AuthMethod {
    if passphrase.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    }
}

impl WifiDriver for EspWifiDriver {
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError> {
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| NetworkError::InvalidSsid)?,
            password: passphrase
                .try_into()
                .map_err(|_| NetworkError::InvalidPassphrase)?,
            auth_method: auth_method(passphrase),
            ..Default::default()
        });
        self.reconfigure(&config)?;
        self.wifi.connect()?;
        Ok(())
    }

    fn is_station_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        if !self.is_station_connected() {
            return None;
        }
        self.wifi.sta_netif().get_ip_info().ok().map(|info| info.ip)
    }

    fn rssi(&self) -> Option<i8> {
        if !self.is_station_connected() {
            return None;
        }
        let mut record = wifi_ap_record_t::default();
        // SAFETY: `record` is a valid, writable out-parameter for the call.
        let code = unsafe { esp_wifi_sta_get_ap_info(&mut record) };
        (code == ESP_OK as i32).then_some(record.rssi)
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<Ipv4Addr, NetworkError> {
        let config = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: ssid.try_into().map_err(|_| NetworkError::InvalidSsid)?,
            password: passphrase
                .try_into()
                .map_err(|_| NetworkError::InvalidPassphrase)?,
            auth_method: auth_method(passphrase),
            channel: AP_CHANNEL,
            max_connections: AP_MAX_CONNECTIONS,
            ..Default::default()
        });
        self.reconfigure(&config)?;
        self.ap_running = true;
        let ip = self.wifi.ap_netif().get_ip_info()?.ip;
        Ok(ip)
    }

    fn access_point_ip(&self) -> Option<Ipv4Addr> {
        if !self.ap_running {
            return None;
        }
        self.wifi.ap_netif().get_ip_info().ok().map(|info| info.ip)
    }

    fn advertise(&mut self, hostname: &str, port: u16) -> Result<(), NetworkError> {
        // The responder follows the netifs across mode switches.
        if self.mdns.is_some() {
            return Ok(());
        }
        let mdns = self.mdns.insert(EspMdns::take()?);
        mdns.set_hostname(hostname)?;
        mdns.set_instance_name(hostname)?;
        if let Err(e) = mdns.add_service(None, "_http", "_tcp", port, &[]) {
            warn!("mDNS service registration failed: {:?}", e);
        }
        info!("mDNS: http://{}.local:{}", hostname, port);
        Ok(())
    }
}
