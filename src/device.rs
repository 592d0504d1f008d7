//! Device composition.
//!
//! [`Device`] owns every piece of portal state: the file store, the
//! connectivity controller and the credential gate. It is built once at
//! startup by [`Device::begin`] and shared with the HTTP server behind an
//! `Arc`.
//!
//! Locking: the network, credential and upload locks are never held at the
//! same time, so there is no lock ordering to respect.

use crate::auth::{ChangeReport, CredentialGate, ValidationError};
use crate::config::{ConfigStore, NetworkUpdate, Settings, UnstorableValue};
use crate::network::{ConnectivityController, NetworkStatus, TransitionReport, WifiDriver};
use crate::storage::{human_size, FileStore, MountError};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Snapshot reported by `/api/status.json` and [`Device::log_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub network: NetworkStatus,
    /// `<hostname>.local`
    pub mdns_name: String,
    /// Storage usage, if the listing could be read.
    pub used_bytes: Option<u64>,
}

/// Result of [`Device::begin`].
pub struct Startup {
    pub device: Arc<Device>,
    /// Whether the device is reachable in either mode.
    pub online: bool,
    pub report: TransitionReport,
}

/// Running portal device.
pub struct Device {
    settings: Settings,
    files: Arc<dyn FileStore>,
    network: Mutex<ConnectivityController>,
    gate: Mutex<CredentialGate>,
    uploads: Mutex<()>,
}

impl Device {
    /// Mount storage, load the persisted records and bring the network up.
    ///
    /// A mount failure is the only fatal error. Everything after it degrades
    /// to defaults or to AP mode.
    pub async fn begin<M>(
        settings: Settings,
        mount: M,
        driver: Box<dyn WifiDriver>,
    ) -> Result<Startup, MountError>
    where
        M: FnOnce(&Settings) -> Result<Arc<dyn FileStore>, MountError>,
    {
        let files = mount(&settings)?;
        let store = ConfigStore::new(files.clone());

        let gate = CredentialGate::load(store.clone(), settings.auth_defaults.clone());
        info!("Management user: '{}'", gate.username());

        let mut controller = ConnectivityController::new(driver, store, &settings);
        let report = controller.start().await;
        advertise(&mut controller, &settings);

        let online = report.outcome.success;
        let device = Arc::new(Self {
            settings,
            files,
            network: Mutex::new(controller),
            gate: Mutex::new(gate),
            uploads: Mutex::new(()),
        });
        device.log_status().await;

        Ok(Startup {
            device,
            online,
            report,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The device filesystem.
    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.files
    }

    /// Current status.
    pub async fn status(&self) -> DeviceStatus {
        let network = self.network.lock().await.status();
        let used_bytes = match self.files.used_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Storage usage unavailable: {}", e);
                None
            }
        };
        DeviceStatus {
            network,
            mdns_name: self.settings.mdns_name(),
            used_bytes,
        }
    }

    /// Log the status block.
    pub async fn log_status(&self) {
        let status = self.status().await;
        let net = &status.network;
        info!("=== Device status ===");
        info!("Mode: {} ({:?})", net.mode, net.state);
        if let Some(ssid) = &net.ssid {
            info!("SSID: {}", ssid);
        }
        if let Some(ap_ssid) = &net.ap_ssid {
            info!("AP SSID: {}", ap_ssid);
        }
        if let Some(rssi) = net.rssi {
            info!("RSSI: {} dBm", rssi);
        }
        match net.ip {
            Some(ip) => info!("IP: {}", ip),
            None => info!("IP: none"),
        }
        info!("mDNS: {}", status.mdns_name);
        if let Some(used) = status.used_bytes {
            info!("Storage used: {}", human_size(used));
        }
    }

    /// Check management credentials.
    pub async fn authorize(&self, user: &str, pass: &str) -> bool {
        self.gate.lock().await.authorize(user, pass)
    }

    /// Replace the management credentials.
    pub async fn change_credentials(
        &self,
        user: &str,
        pass: &str,
    ) -> Result<ChangeReport, ValidationError> {
        self.gate.lock().await.change(user, pass)
    }

    /// Apply a network form submission.
    pub async fn apply_network(
        &self,
        update: &NetworkUpdate,
    ) -> Result<TransitionReport, UnstorableValue> {
        let mut network = self.network.lock().await;
        let report = network.apply_update(update).await?;
        advertise(&mut network, &self.settings);
        Ok(report)
    }

    /// Join a station network.
    pub async fn request_station(
        &self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<TransitionReport, UnstorableValue> {
        let mut network = self.network.lock().await;
        let report = network.request_station(ssid, passphrase).await?;
        advertise(&mut network, &self.settings);
        Ok(report)
    }

    /// Host an access point.
    pub async fn request_access_point(
        &self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<TransitionReport, UnstorableValue> {
        let mut network = self.network.lock().await;
        let report = network.request_access_point(ssid, passphrase).await?;
        advertise(&mut network, &self.settings);
        Ok(report)
    }

    /// Serialize uploads. Hold the guard for the whole upload.
    pub async fn lock_uploads(&self) -> MutexGuard<'_, ()> {
        self.uploads.lock().await
    }
}

fn advertise(controller: &mut ConnectivityController, settings: &Settings) {
    if let Err(e) = controller
        .driver_mut()
        .advertise(&settings.mdns_hostname, settings.http_port)
    {
        warn!("mDNS advertisement failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkMode, Record};
    use crate::network::fake::FakeWifi;
    use crate::storage::MemoryFileStore;

    fn memory_mount(files: &MemoryFileStore) -> impl FnOnce(&Settings) -> Result<Arc<dyn FileStore>, MountError> {
        let files = files.clone();
        move |_| Ok(Arc::new(files) as Arc<dyn FileStore>)
    }

    // ==================== Startup Tests ====================

    #[tokio::test]
    async fn test_begin_on_empty_store() {
        let files = MemoryFileStore::new();
        let radio = FakeWifi::new();

        let startup = Device::begin(
            Settings::default(),
            memory_mount(&files),
            Box::new(radio.clone()),
        )
        .await
        .unwrap();

        assert!(startup.online);
        assert_eq!(startup.report.outcome.mode, NetworkMode::Ap);
        assert!(startup.device.authorize("files", "files123").await);
        assert_eq!(radio.advertised(), Some(("esp32fs".to_string(), 80)));

        let status = startup.device.status().await;
        assert_eq!(status.network.mode, NetworkMode::Ap);
        assert_eq!(status.mdns_name, "esp32fs.local");
        // The network record written at startup is the only file.
        assert!(files.exists(crate::config::NetworkConfig::PATH));
        assert_eq!(
            status.used_bytes,
            Some(files.contents("/network.cfg").unwrap().len() as u64)
        );
    }

    #[tokio::test]
    async fn test_begin_mount_failure_is_fatal() {
        let radio = FakeWifi::new();
        let result = Device::begin(
            Settings::default(),
            |_: &Settings| -> Result<Arc<dyn FileStore>, MountError> {
                Err(MountError::Partition {
                    root: "/spiffs".into(),
                    code: -1,
                })
            },
            Box::new(radio.clone()),
        )
        .await;

        assert!(matches!(result, Err(MountError::Partition { .. })));
        assert_eq!(radio.access_point_starts(), 0);
    }

    #[tokio::test]
    async fn test_begin_offline_when_ap_fails() {
        let files = MemoryFileStore::new();
        let radio = FakeWifi::new();
        radio.fail_access_point(true);

        let startup = Device::begin(
            Settings::default(),
            memory_mount(&files),
            Box::new(radio),
        )
        .await
        .unwrap();

        assert!(!startup.online);
    }

    #[tokio::test]
    async fn test_begin_loads_persisted_credentials() {
        let files = MemoryFileStore::new();
        files.insert("/auth.cfg", b"user=bob\npass=abcd\n".to_vec());

        let startup = Device::begin(
            Settings::default(),
            memory_mount(&files),
            Box::new(FakeWifi::new()),
        )
        .await
        .unwrap();

        assert!(startup.device.authorize("bob", "abcd").await);
        assert!(!startup.device.authorize("files", "files123").await);
    }

    // ==================== Operation Tests ====================

    #[tokio::test]
    async fn test_change_credentials_gates_later_requests() {
        let files = MemoryFileStore::new();
        let startup = Device::begin(
            Settings::default(),
            memory_mount(&files),
            Box::new(FakeWifi::new()),
        )
        .await
        .unwrap();
        let device = startup.device;

        let report = device.change_credentials("bob", "abcd").await.unwrap();
        assert!(report.persisted.is_ok());
        assert!(device.authorize("bob", "abcd").await);
        assert!(!device.authorize("files", "files123").await);
        assert_eq!(
            files.contents("/auth.cfg").unwrap(),
            b"user=bob\npass=abcd\n".to_vec()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_station_then_access_point() {
        let files = MemoryFileStore::new();
        let radio = FakeWifi::new();
        let startup = Device::begin(
            Settings::default(),
            memory_mount(&files),
            Box::new(radio.clone()),
        )
        .await
        .unwrap();
        let device = startup.device;

        radio.join_after_polls(2);
        let report = device.request_station("Home", "pw123456").await.unwrap();
        assert_eq!(report.outcome.mode, NetworkMode::Sta);
        assert_eq!(device.status().await.network.ssid.as_deref(), Some("Home"));

        let report = device.request_access_point("Shop", "shoppass").await.unwrap();
        assert_eq!(report.outcome.mode, NetworkMode::Ap);
        assert_eq!(
            device.status().await.network.ap_ssid.as_deref(),
            Some("Shop")
        );
    }
}
