//! Telemetry samples and their JSON wire format.
//!
//! Field names and types are the contract with the backend consumer.
//! Timestamps are carried as Unix seconds and rendered as UTC RFC3339
//! with second resolution (`YYYY-MM-DDTHH:MM:SSZ`).

use chrono::{DateTime, SecondsFormat};
use serde::{Serialize, Serializer};

use crate::error::EncodeError;

/// Maximum number of series cells the BMS board can monitor.
pub const MAX_CELLS: usize = 6;
/// Maximum number of battery thermistors on the BMS board.
pub const MAX_THERMISTORS: usize = 2;

pub const TOPIC_BATTERY: &str = "/bicycle/battery-status";
pub const TOPIC_GPS: &str = "/bicycle/gps-coordinates";

/// Seconds since the Unix epoch, UTC.
pub type UnixTime = i64;

/// Current BMS status including measurements and error flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub state: u16,
    pub chg_enable: bool,
    pub dis_enable: bool,
    /// Cells actually connected (may be less than [`MAX_CELLS`]).
    pub connected_cells: u16,
    /// Per-cell voltages (V).
    pub cell_voltages: [f32; MAX_CELLS],
    pub cell_voltage_max: f32,
    pub cell_voltage_min: f32,
    pub cell_voltage_avg: f32,
    /// External pack voltage (V).
    pub pack_voltage: f32,
    /// Internal stack voltage (V).
    pub stack_voltage: f32,
    /// Pack current, positive when charging (A).
    pub pack_current: f32,
    /// Battery temperatures (°C).
    pub bat_temps: [f32; MAX_THERMISTORS],
    pub bat_temp_max: f32,
    pub bat_temp_min: f32,
    pub bat_temp_avg: f32,
    pub mosfet_temp: f32,
    pub ic_temp: f32,
    pub mcu_temp: f32,
    /// CV charging finished.
    pub full: bool,
    /// Discharged below the cell cut-off voltage.
    pub empty: bool,
    /// State of charge (%).
    pub soc: f32,
    pub balancing_status: u32,
    /// Last time the current exceeded the idle threshold.
    #[serde(serialize_with = "rfc3339")]
    pub no_idle_timestamp: UnixTime,
    pub error_flags: u32,
    #[serde(serialize_with = "rfc3339")]
    pub timestamp: UnixTime,
}

/// A GPS fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f32,
    pub longitude: f32,
    #[serde(serialize_with = "rfc3339")]
    pub timestamp: UnixTime,
}

/// One reading produced by the sensor collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetrySample {
    BatteryStatus(BatteryStatus),
    Location(Location),
}

impl TelemetrySample {
    /// Fixed MQTT topic for this kind of sample.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::BatteryStatus(_) => TOPIC_BATTERY,
            Self::Location(_) => TOPIC_GPS,
        }
    }

    /// Serialise to a compact JSON payload.
    pub fn to_json(&self) -> Result<Vec<u8>, EncodeError> {
        let encoded = match self {
            Self::BatteryStatus(b) => serde_json::to_vec(b),
            Self::Location(l) => serde_json::to_vec(l),
        };
        encoded.map_err(|e| {
            if e.is_data() {
                EncodeError::TimestampOutOfRange
            } else {
                EncodeError::Json
            }
        })
    }
}

/// Format Unix seconds as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_timestamp(secs: UnixTime) -> Result<String, EncodeError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or(EncodeError::TimestampOutOfRange)
}

fn rfc3339<S: Serializer>(secs: &UnixTime, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted =
        format_timestamp(*secs).map_err(<S::Error as serde::ser::Error>::custom)?;
    serializer.serialize_str(&formatted)
}
