//! Port traits: the boundary between the bring-up/publish core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Bootstrap / SessionManager / TelemetryPublisher
//! ```
//!
//! Device adapters (Wi-Fi, PPP modem, ESP-MQTT client, sensors, clocks)
//! implement these traits; tests implement them with scripted mocks.

use core::time::Duration;

use crate::error::{LinkError, PublishError, SessionError};
use crate::telemetry::{BatteryStatus, Location, UnixTime};

use super::events::{BrokerEventHandler, LinkEventHandler};

// ───────────────────────────────────────────────────────────────
// Link driver (Wi-Fi station or PPP-over-modem)
// ───────────────────────────────────────────────────────────────

/// Received signal quality as reported by `AT+CSQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// RSSI index 0–31, `None` when the modem reports 99 (unknown).
    pub rssi: Option<u8>,
    /// Bit error rate index 0–7, `None` when unknown.
    pub ber: Option<u8>,
}

impl SignalQuality {
    /// Approximate RSSI in dBm (−113 dBm at index 0, 2 dB per step).
    pub fn rssi_dbm(&self) -> Option<i16> {
        self.rssi.map(|r| -113 + 2 * i16::from(r))
    }
}

/// Physical transport that brings up IP connectivity.
///
/// Command-mode operations (`sim_pin_required`, `unlock_sim`,
/// `signal_quality`) are only valid before [`enter_data_mode`]; afterwards
/// drivers must reject them with [`LinkError::DataModeActive`].
///
/// [`enter_data_mode`]: LinkDriver::enter_data_mode
pub trait LinkDriver {
    /// Initialise the transport and register the single link-event handler.
    fn start(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError>;

    /// Whether the SIM is locked and waiting for a PIN.
    fn sim_pin_required(&mut self) -> Result<bool, LinkError>;

    /// Present the SIM PIN.
    fn unlock_sim(&mut self, pin: &str) -> Result<(), LinkError>;

    /// Query signal quality.  `None` for transports without the concept.
    fn signal_quality(&mut self) -> Result<Option<SignalQuality>, LinkError>;

    /// Switch from command to data mode.  Point of no return until reset.
    fn enter_data_mode(&mut self) -> Result<(), LinkError>;
}

// ───────────────────────────────────────────────────────────────
// MQTT client
// ───────────────────────────────────────────────────────────────

/// MQTT quality-of-service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A live MQTT client handle.
///
/// Implementations own their outbound queue and must accept concurrent
/// `publish` calls.  Returns the message id on successful enqueue and
/// [`PublishError::Transport`] when the client refuses the message.
pub trait MqttTransport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<u32, PublishError>;
}

/// Factory that creates and starts an MQTT client.
///
/// The handler is registered once and lives as long as the returned client.
pub trait MqttConnector {
    fn connect(
        &mut self,
        broker_uri: &str,
        on_event: BrokerEventHandler,
    ) -> Result<Box<dyn MqttTransport>, SessionError>;
}

// ───────────────────────────────────────────────────────────────
// Sensors
// ───────────────────────────────────────────────────────────────

/// Produces telemetry readings on demand.
pub trait TelemetrySource {
    fn battery_status(&mut self) -> BatteryStatus;
    fn location(&mut self) -> Location;
}

// ───────────────────────────────────────────────────────────────
// Time
// ───────────────────────────────────────────────────────────────

/// Monotonic and wall-clock time.
pub trait Clock {
    /// Time since boot.  Never goes backwards.
    fn monotonic(&self) -> Duration;

    /// Block until `monotonic() >= deadline`.  Returns at once if already past.
    fn sleep_until(&self, deadline: Duration);

    /// Current UTC wall-clock time in Unix seconds.
    fn unix_time(&self) -> UnixTime;
}
