//! Device portal binary.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin portal`
//! - **ESP32**: `cargo espflash flash --bin portal --features esp32 --release`
//!
//! On host, settings come from `PORTAL_*` environment variables and the
//! filesystem lives under `~/.device-portal/fs`.

use device_portal::storage::{self, FileStore, MountError};
use device_portal::{Device, ManagementApi, PortalServer, Settings, WifiDriver};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often the status block is logged.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "esp32")]
fn create_driver() -> Result<Box<dyn WifiDriver>, esp_idf_sys::EspError> {
    use device_portal::network::EspWifiDriver;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let driver = EspWifiDriver::new(peripherals.modem, sysloop, Some(nvs))?;
    Ok(Box::new(driver))
}

#[cfg(not(feature = "esp32"))]
fn create_driver() -> Result<Box<dyn WifiDriver>, std::convert::Infallible> {
    Ok(Box::new(device_portal::HostWifi::new()))
}

fn mount(settings: &Settings) -> Result<Arc<dyn FileStore>, MountError> {
    let files = storage::mount(settings)?;
    Ok(Arc::new(files))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== Device portal starting ===");

    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host");

    let settings = Settings::from_env();

    let driver = match create_driver() {
        Ok(driver) => driver,
        Err(e) => {
            error!("WiFi driver init failed: {:?}", e);
            return;
        }
    };

    let startup = match Device::begin(settings, mount, driver).await {
        Ok(startup) => startup,
        Err(e) => {
            error!("Startup failed: {}", e);
            return;
        }
    };
    if !startup.online {
        warn!("Device is not reachable over the network");
    }
    let device = startup.device;

    // Keep the server alive; dropping it stops the listener
    let port = device.settings().http_port;
    let _server = match PortalServer::start(None, port, ManagementApi::new(device.clone())) {
        Ok(server) => Some(server),
        Err(e) => {
            error!("Failed to start management API on port {}: {}", port, e);
            None
        }
    };

    let cancel = CancellationToken::new();

    #[cfg(not(feature = "esp32"))]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
                cancel.cancel();
            }
        });
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // Skip first

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = heartbeat.tick() => device.log_status().await,
        }
    }

    info!("Shutdown complete");
}
