//! Wi-Fi station link adapter.
//!
//! Implements [`LinkDriver`] for the Wi-Fi transport.  Wi-Fi has no SIM
//! and no AT command mode, so those steps are trivially satisfied; the
//! "data mode" switch is the station connect, after which DHCP delivers
//! `GotAddress` through the IP event bridge.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi` STA driver behind
//!   `BlockingWifi`.
//! - **all other targets**: simulation that reports a DHCP lease itself.
//!
//! ## Connect policy
//!
//! Up to [`CONNECT_ATTEMPTS`] station connects with exponential backoff
//! (2 s → 4 s …) between them.  Giving up is fatal to bring-up.

use log::{error, info, warn};

use crate::app::events::LinkEventHandler;
use crate::app::ports::{LinkDriver, SignalQuality};
use crate::config::{Password, Ssid};
use crate::error::LinkError;

pub const CONNECT_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Stopped,
    Started,
    Connecting { attempt: u32 },
    Connected,
    Failed,
}

pub struct WifiLink {
    state: WifiState,
    ssid: Ssid,
    password: Password,
    #[cfg(target_os = "espidf")]
    wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim_handler: Option<LinkEventHandler>,
    /// Simulation: number of connect attempts to fail before succeeding.
    #[cfg(not(target_os = "espidf"))]
    sim_failures: u32,
}

impl WifiLink {
    #[cfg(target_os = "espidf")]
    pub fn new(
        wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
        ssid: Ssid,
        password: Password,
    ) -> Self {
        Self {
            state: WifiState::Stopped,
            ssid,
            password,
            wifi,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(ssid: Ssid, password: Password) -> Self {
        Self {
            state: WifiState::Stopped,
            ssid,
            password,
            sim_handler: None,
            sim_failures: 0,
        }
    }

    /// Simulation: fail the first `n` connect attempts.
    #[cfg(not(target_os = "espidf"))]
    pub fn failing_connects(mut self, n: u32) -> Self {
        self.sim_failures = n;
        self
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    fn backoff(attempt: u32) -> std::time::Duration {
        std::time::Duration::from_secs(INITIAL_BACKOFF_SECS << (attempt - 1).min(4))
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        super::ip_events::subscribe(on_event)?;

        let auth_method = if self.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: self
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InitFailed)?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InitFailed)?,
            auth_method,
            ..Default::default()
        });
        self.wifi.set_configuration(&config).map_err(|e| {
            error!("WiFi: set_configuration failed: {}", e);
            LinkError::InitFailed
        })?;
        self.wifi.start().map_err(|e| {
            error!("WiFi: start failed: {}", e);
            LinkError::InitFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError> {
        self.sim_handler = Some(on_event);
        info!("WiFi(sim): driver started");
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), LinkError> {
        self.wifi.connect().map_err(|e| {
            warn!("WiFi: connect failed: {}", e);
            LinkError::ConnectFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), LinkError> {
        use crate::app::events::{IpInfo, LinkEvent};
        use std::net::Ipv4Addr;

        if self.sim_failures > 0 {
            self.sim_failures -= 1;
            warn!("WiFi(sim): simulated association failure");
            return Err(LinkError::ConnectFailed);
        }
        info!("WiFi(sim): associated with '{}'", self.ssid);
        if let Some(handler) = &self.sim_handler {
            handler(LinkEvent::GotAddress(IpInfo {
                addr: Ipv4Addr::new(192, 168, 4, 20),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::new(192, 168, 4, 1),
                dns: [Some(Ipv4Addr::new(192, 168, 4, 1).into()), None],
            }));
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_sleep(&self, d: std::time::Duration) {
        std::thread::sleep(d);
    }

    /// Simulation: no real backoff, tests would otherwise wait seconds.
    #[cfg(not(target_os = "espidf"))]
    fn platform_sleep(&self, _d: std::time::Duration) {}
}

impl LinkDriver for WifiLink {
    fn start(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError> {
        if self.state != WifiState::Stopped {
            return Err(LinkError::InitFailed);
        }
        info!("WiFi: starting station for '{}'", self.ssid);
        match self.platform_start(on_event) {
            Ok(()) => {
                self.state = WifiState::Started;
                Ok(())
            }
            Err(e) => {
                self.state = WifiState::Failed;
                Err(e)
            }
        }
    }

    fn sim_pin_required(&mut self) -> Result<bool, LinkError> {
        Ok(false)
    }

    fn unlock_sim(&mut self, _pin: &str) -> Result<(), LinkError> {
        Err(LinkError::CommandRejected)
    }

    fn signal_quality(&mut self) -> Result<Option<SignalQuality>, LinkError> {
        match self.state {
            WifiState::Connected => Err(LinkError::DataModeActive),
            _ => Ok(None),
        }
    }

    fn enter_data_mode(&mut self) -> Result<(), LinkError> {
        match self.state {
            WifiState::Started => {}
            WifiState::Connected => return Err(LinkError::DataModeActive),
            _ => return Err(LinkError::ModeSwitchFailed),
        }

        for attempt in 1..=CONNECT_ATTEMPTS {
            self.state = WifiState::Connecting { attempt };
            info!("WiFi: connect attempt {}/{}", attempt, CONNECT_ATTEMPTS);
            if self.platform_connect().is_ok() {
                self.state = WifiState::Connected;
                info!("WiFi: associated, waiting for DHCP");
                return Ok(());
            }
            if attempt < CONNECT_ATTEMPTS {
                let backoff = Self::backoff(attempt);
                info!("WiFi: retrying in {}s", backoff.as_secs());
                self.platform_sleep(backoff);
            }
        }

        error!("WiFi: giving up after {} attempts", CONNECT_ATTEMPTS);
        self.state = WifiState::Failed;
        Err(LinkError::ConnectFailed)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
