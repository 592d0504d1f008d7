//! Connectivity state machine.
//!
//! ```text
//!                  start / request
//!  Disconnected ──────────────────┬──────────────► ConnectingSta
//!                                 │                   │      │
//!                                 │            joined │      │ timeout
//!                                 │                   ▼      │
//!                                 │           ConnectedSta   │
//!                                 ▼                          │
//!                             RunningAp ◄────────────────────┘
//! ```
//!
//! A station join is a single attempt: the join is issued once and the link
//! status is polled at a fixed interval until it comes up or the timeout
//! expires. On timeout the device falls back to its own access point so it
//! always stays reachable. The poll sleeps on the tokio timer, so other tasks
//! keep running while a join is in progress.
//!
//! Every transition persists the resulting mode before returning. A failed
//! write is reported in the [`TransitionReport`] but never stops the radio
//! transition, so the radio and the stored record can disagree when storage
//! is unavailable.

use super::WifiDriver;
use crate::config::{
    check_value, ApDefaults, ConfigStore, NetworkConfig, NetworkMode, NetworkUpdate, Settings,
    StoreError, UnstorableValue,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;

/// Connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    /// No link, either before startup or after the access point failed to start.
    Disconnected,
    /// Station join in progress.
    ConnectingSta,
    /// Joined an existing network.
    ConnectedSta,
    /// Hosting an access point.
    RunningAp,
}

/// Station join timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTiming {
    /// Give up on the join after this long.
    pub timeout: Duration,
    /// Check the link this often.
    pub poll_interval: Duration,
}

/// Result of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOutcome {
    /// Mode the device ended up in.
    pub mode: NetworkMode,
    /// Device address in that mode.
    pub ip: Option<Ipv4Addr>,
    /// Time spent on the whole transition, including any fallback.
    pub elapsed: Duration,
    /// Whether the device is reachable in `mode`.
    pub success: bool,
}

/// Outcome of a transition plus the result of persisting it.
#[derive(Debug)]
pub struct TransitionReport {
    pub outcome: ConnectionOutcome,
    /// Whether a station attempt timed out into AP mode.
    pub fell_back: bool,
    pub persisted: Result<(), StoreError>,
}

/// Snapshot of the link for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    pub state: LinkState,
    pub mode: NetworkMode,
    pub ip: Option<Ipv4Addr>,
    /// Station SSID, in STA mode.
    pub ssid: Option<String>,
    /// Access point SSID, in AP mode.
    pub ap_ssid: Option<String>,
    /// Signal strength, when joined.
    pub rssi: Option<i8>,
}

/// Owns the radio and the network record.
pub struct ConnectivityController {
    driver: Box<dyn WifiDriver>,
    store: ConfigStore,
    config: NetworkConfig,
    ap_defaults: ApDefaults,
    timing: ConnectTiming,
    state: LinkState,
}

impl ConnectivityController {
    /// Create a controller. Nothing is loaded or started until [`Self::start`].
    pub fn new(driver: Box<dyn WifiDriver>, store: ConfigStore, settings: &Settings) -> Self {
        Self {
            driver,
            store,
            config: NetworkConfig::with_defaults(&settings.ap_defaults),
            ap_defaults: settings.ap_defaults.clone(),
            timing: ConnectTiming {
                timeout: settings.connect_timeout,
                poll_interval: settings.poll_interval,
            },
            state: LinkState::Disconnected,
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Current network record.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Join timing in use.
    pub fn timing(&self) -> ConnectTiming {
        self.timing
    }

    /// Mutable access to the radio, for mDNS advertisement.
    pub fn driver_mut(&mut self) -> &mut dyn WifiDriver {
        self.driver.as_mut()
    }

    /// Load the persisted record and bring the link up.
    pub async fn start(&mut self) -> TransitionReport {
        self.config = self
            .store
            .load_record(NetworkConfig::with_defaults(&self.ap_defaults));
        self.config.fill_ap_defaults(&self.ap_defaults);
        info!(
            "Network config: mode={}, ssid=\"{}\", apSsid=\"{}\"",
            self.config.mode, self.config.station_ssid, self.config.ap_ssid
        );
        self.apply().await
    }

    /// Switch to station mode with new credentials.
    ///
    /// Credentials that cannot be stored are rejected before anything changes.
    pub async fn request_station(
        &mut self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<TransitionReport, UnstorableValue> {
        check_value("ssid", ssid)?;
        check_value("pass", passphrase)?;
        self.config.mode = NetworkMode::Sta;
        self.config.station_ssid = ssid.to_string();
        self.config.station_passphrase = passphrase.to_string();
        Ok(self.apply().await)
    }

    /// Switch to access point mode with new credentials.
    pub async fn request_access_point(
        &mut self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<TransitionReport, UnstorableValue> {
        check_value("apSsid", ssid)?;
        check_value("apPass", passphrase)?;
        self.config.mode = NetworkMode::Ap;
        self.config.ap_ssid = ssid.to_string();
        self.config.ap_passphrase = passphrase.to_string();
        Ok(self.apply().await)
    }

    /// Apply a management form submission and re-enter the selected mode.
    pub async fn apply_update(
        &mut self,
        update: &NetworkUpdate,
    ) -> Result<TransitionReport, UnstorableValue> {
        update.validate()?;
        self.config.apply_update(update);
        Ok(self.apply().await)
    }

    /// Link snapshot.
    pub fn status(&self) -> NetworkStatus {
        let joined = self.state == LinkState::ConnectedSta;
        let mode = self.config.mode;
        NetworkStatus {
            state: self.state,
            mode,
            ip: if joined {
                self.driver.station_ip()
            } else {
                self.driver.access_point_ip()
            },
            ssid: (mode == NetworkMode::Sta).then(|| self.config.station_ssid.clone()),
            ap_ssid: (mode == NetworkMode::Ap).then(|| self.config.ap_ssid.clone()),
            rssi: if joined { self.driver.rssi() } else { None },
        }
    }

    async fn apply(&mut self) -> TransitionReport {
        if self.config.wants_station() {
            self.connect_station().await
        } else {
            if self.config.mode == NetworkMode::Sta {
                info!("STA mode without SSID, running as AP");
            }
            self.run_access_point().await
        }
    }

    async fn connect_station(&mut self) -> TransitionReport {
        let started = Instant::now();
        let ssid = self.config.station_ssid.clone();
        let passphrase = self.config.station_passphrase.clone();

        self.state = LinkState::ConnectingSta;
        info!("Connecting to SSID \"{}\"...", ssid);

        let joined = match self.driver.begin_station(&ssid, &passphrase) {
            Ok(()) => self.wait_for_station().await,
            Err(e) => {
                warn!("Station join rejected: {}", e);
                false
            }
        };

        if joined {
            self.state = LinkState::ConnectedSta;
            self.config.mode = NetworkMode::Sta;
            let ip = self.driver.station_ip();
            info!(
                "Connected to \"{}\", IP: {}",
                ssid,
                ip.map(|ip| ip.to_string()).unwrap_or_else(|| "?".into())
            );
            let persisted = self.persist();
            return TransitionReport {
                outcome: ConnectionOutcome {
                    mode: NetworkMode::Sta,
                    ip,
                    elapsed: started.elapsed(),
                    success: true,
                },
                fell_back: false,
                persisted,
            };
        }

        warn!(
            "Could not join \"{}\" within {:?}, falling back to AP",
            ssid, self.timing.timeout
        );
        let mut report = self.run_access_point().await;
        report.outcome.elapsed = started.elapsed();
        report.fell_back = true;
        report
    }

    /// Poll the link until it is up or the timeout expires.
    async fn wait_for_station(&mut self) -> bool {
        let driver = &mut self.driver;
        let poll = self.timing.poll_interval;
        let wait = async move {
            loop {
                if driver.is_station_connected() {
                    return;
                }
                debug!("Station not up yet");
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(self.timing.timeout, wait).await.is_ok()
    }

    async fn run_access_point(&mut self) -> TransitionReport {
        let started = Instant::now();
        self.config.fill_ap_defaults(&self.ap_defaults);
        let ssid = self.config.ap_ssid.clone();
        let passphrase = self.config.ap_passphrase.clone();

        let (ip, success) = match self.driver.start_access_point(&ssid, &passphrase) {
            Ok(ip) => {
                info!("AP \"{}\" started, IP: {}", ssid, ip);
                (Some(ip), true)
            }
            Err(e) => {
                error!("AP \"{}\" FAILED: {}", ssid, e);
                (None, false)
            }
        };

        self.state = if success {
            LinkState::RunningAp
        } else {
            LinkState::Disconnected
        };
        self.config.mode = NetworkMode::Ap;
        let persisted = self.persist();

        TransitionReport {
            outcome: ConnectionOutcome {
                mode: NetworkMode::Ap,
                ip,
                elapsed: started.elapsed(),
                success,
            },
            fell_back: false,
            persisted,
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let result = self.store.save_record(&self.config);
        if let Err(e) = &result {
            warn!("Network config not persisted: {}", e);
        }
        result
    }
}
