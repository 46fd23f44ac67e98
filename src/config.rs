//! Tracker configuration.
//!
//! Values are fixed at build time (the firmware equivalent of Kconfig
//! `CONFIG_*` symbols) through `TRACKER_*` environment variables read with
//! `option_env!`.  Nothing is persisted on the device; the config is
//! rebuilt on every boot.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Broker used when `TRACKER_BROKER_URL` is not set.
pub const DEFAULT_BROKER_URI: &str = "mqtt://mqtt.eclipseprojects.io";
/// Publish period used when `TRACKER_MESSAGE_PERIOD` is not set.
pub const DEFAULT_PUBLISH_PERIOD_SECS: u32 = 10;
/// APN used when `TRACKER_MODEM_APN` is not set.
pub const DEFAULT_APN: &str = "internet";

const MAX_PUBLISH_PERIOD_SECS: u32 = 86_400;

pub type BrokerUri = heapless::String<128>;
pub type Ssid = heapless::String<32>;
pub type Password = heapless::String<64>;
pub type Apn = heapless::String<64>;
pub type SimPin = heapless::String<8>;

/// UART flow-control mode between the ESP32 and the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// Supported cellular modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemModel {
    Sim800,
    Sim7600,
    Bg96,
    Generic,
}

impl ModemModel {
    /// Name as it appears in the module's `AT+CGMM` answer.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sim800 => "SIM800",
            Self::Sim7600 => "SIM7600",
            Self::Bg96 => "BG96",
            Self::Generic => "generic",
        }
    }
}

/// UART wiring for the cellular modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    pub tx_pin: i32,
    pub rx_pin: i32,
    pub rts_pin: i32,
    pub cts_pin: i32,
    pub baud_rate: u32,
    pub flow_control: FlowControl,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            tx_pin: 25,
            rx_pin: 26,
            rts_pin: 27,
            cts_pin: 23,
            baud_rate: 115_200,
            flow_control: FlowControl::None,
        }
    }
}

/// Which transport brings up IP connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkConfig {
    Wifi {
        ssid: Ssid,
        password: Password,
    },
    Cellular {
        apn: Apn,
        model: ModemModel,
        uart: UartConfig,
        sim_pin: Option<SimPin>,
    },
}

impl LinkConfig {
    /// SIM PIN to present during bring-up, if any.
    pub fn sim_pin(&self) -> Option<&str> {
        match self {
            Self::Cellular { sim_pin, .. } => sim_pin.as_deref(),
            Self::Wifi { .. } => None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// MQTT broker, e.g. `mqtt://broker.local:1883`.
    pub broker_uri: BrokerUri,
    /// Telemetry publish period in seconds.
    pub publish_period_secs: u32,
    pub link: LinkConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            broker_uri: fixed(DEFAULT_BROKER_URI),
            publish_period_secs: DEFAULT_PUBLISH_PERIOD_SECS,
            link: LinkConfig::Cellular {
                apn: fixed(DEFAULT_APN),
                model: ModemModel::Generic,
                uart: UartConfig::default(),
                sim_pin: None,
            },
        }
    }
}

impl TrackerConfig {
    /// Build from the `TRACKER_*` variables captured at compile time.
    pub fn from_build_env() -> Result<Self, ConfigError> {
        let vars: [(&str, Option<&'static str>); 13] = [
            ("TRACKER_BROKER_URL", option_env!("TRACKER_BROKER_URL")),
            ("TRACKER_MESSAGE_PERIOD", option_env!("TRACKER_MESSAGE_PERIOD")),
            ("TRACKER_LINK", option_env!("TRACKER_LINK")),
            ("TRACKER_WIFI_SSID", option_env!("TRACKER_WIFI_SSID")),
            ("TRACKER_WIFI_PASSWORD", option_env!("TRACKER_WIFI_PASSWORD")),
            ("TRACKER_MODEM_APN", option_env!("TRACKER_MODEM_APN")),
            ("TRACKER_MODEM_DEVICE", option_env!("TRACKER_MODEM_DEVICE")),
            ("TRACKER_SIM_PIN", option_env!("TRACKER_SIM_PIN")),
            ("TRACKER_UART_TX", option_env!("TRACKER_UART_TX")),
            ("TRACKER_UART_RX", option_env!("TRACKER_UART_RX")),
            ("TRACKER_UART_RTS", option_env!("TRACKER_UART_RTS")),
            ("TRACKER_UART_CTS", option_env!("TRACKER_UART_CTS")),
            ("TRACKER_UART_FLOW_CONTROL", option_env!("TRACKER_UART_FLOW_CONTROL")),
        ];
        Self::from_vars(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| *v)
        })
    }

    /// Build from an arbitrary variable lookup, then validate.
    /// Unset variables fall back to [`TrackerConfig::default`].
    pub fn from_vars<'a>(var: impl Fn(&str) -> Option<&'a str>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(uri) = var("TRACKER_BROKER_URL") {
            cfg.broker_uri = bounded(uri, "broker_uri: too long")?;
        }
        if let Some(period) = var("TRACKER_MESSAGE_PERIOD") {
            cfg.publish_period_secs = period
                .trim()
                .parse()
                .map_err(|_| ConfigError("publish_period_secs: not a number"))?;
        }

        cfg.link = match var("TRACKER_LINK").unwrap_or("cellular") {
            "wifi" => LinkConfig::Wifi {
                ssid: bounded(var("TRACKER_WIFI_SSID").unwrap_or(""), "wifi ssid: too long")?,
                password: bounded(
                    var("TRACKER_WIFI_PASSWORD").unwrap_or(""),
                    "wifi password: too long",
                )?,
            },
            "cellular" => {
                let defaults = UartConfig::default();
                let uart = UartConfig {
                    tx_pin: pin(var("TRACKER_UART_TX"), defaults.tx_pin)?,
                    rx_pin: pin(var("TRACKER_UART_RX"), defaults.rx_pin)?,
                    rts_pin: pin(var("TRACKER_UART_RTS"), defaults.rts_pin)?,
                    cts_pin: pin(var("TRACKER_UART_CTS"), defaults.cts_pin)?,
                    baud_rate: defaults.baud_rate,
                    flow_control: match var("TRACKER_UART_FLOW_CONTROL").unwrap_or("none") {
                        "none" => FlowControl::None,
                        "sw" | "software" => FlowControl::Software,
                        "hw" | "hardware" => FlowControl::Hardware,
                        _ => return Err(ConfigError("uart flow_control: unknown mode")),
                    },
                };
                let model = match var("TRACKER_MODEM_DEVICE").unwrap_or("generic") {
                    "sim800" => ModemModel::Sim800,
                    "sim7600" => ModemModel::Sim7600,
                    "bg96" => ModemModel::Bg96,
                    "generic" => ModemModel::Generic,
                    _ => return Err(ConfigError("modem device: unknown model")),
                };
                let sim_pin = match var("TRACKER_SIM_PIN") {
                    Some(p) if !p.is_empty() => Some(bounded(p, "sim pin: too long")?),
                    _ => None,
                };
                LinkConfig::Cellular {
                    apn: bounded(var("TRACKER_MODEM_APN").unwrap_or(DEFAULT_APN), "apn: too long")?,
                    model,
                    uart,
                    sim_pin,
                }
            }
            _ => return Err(ConfigError("link: expected `wifi` or `cellular`")),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_uri(&self.broker_uri)?;
        if self.publish_period_secs == 0 || self.publish_period_secs > MAX_PUBLISH_PERIOD_SECS {
            return Err(ConfigError("publish_period_secs: must be 1..=86400"));
        }
        match &self.link {
            LinkConfig::Wifi { ssid, password } => {
                validate_ssid(ssid)?;
                validate_password(password)?;
            }
            LinkConfig::Cellular { apn, uart, sim_pin, .. } => {
                if apn.is_empty() || !is_printable_ascii(apn) {
                    return Err(ConfigError("apn: must be non-empty printable ASCII"));
                }
                if let Some(pin) = sim_pin {
                    validate_sim_pin(pin)?;
                }
                validate_uart(uart)?;
            }
        }
        Ok(())
    }

    pub fn publish_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.publish_period_secs))
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_broker_uri(uri: &str) -> Result<(), ConfigError> {
    let rest = ["mqtt://", "mqtts://", "ws://", "wss://"]
        .iter()
        .find_map(|scheme| uri.strip_prefix(scheme))
        .ok_or(ConfigError("broker_uri: scheme must be mqtt, mqtts, ws or wss"))?;
    if rest.is_empty() || !is_printable_ascii(rest) || rest.contains(' ') {
        return Err(ConfigError("broker_uri: missing or invalid host"));
    }
    Ok(())
}

fn validate_ssid(ssid: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConfigError("wifi ssid: must be 1-32 printable ASCII bytes"));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConfigError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConfigError("wifi password: must be 8-64 bytes, or empty for open"));
    }
    Ok(())
}

fn validate_sim_pin(pin: &str) -> Result<(), ConfigError> {
    if !(4..=8).contains(&pin.len()) || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError("sim pin: must be 4-8 digits"));
    }
    Ok(())
}

fn validate_uart(uart: &UartConfig) -> Result<(), ConfigError> {
    if uart.baud_rate == 0 {
        return Err(ConfigError("uart baud_rate: must be non-zero"));
    }
    let mut pins: heapless::Vec<i32, 4> = heapless::Vec::new();
    let _ = pins.push(uart.tx_pin);
    let _ = pins.push(uart.rx_pin);
    if uart.flow_control == FlowControl::Hardware {
        let _ = pins.push(uart.rts_pin);
        let _ = pins.push(uart.cts_pin);
    }
    if pins.iter().any(|p| *p < 0) {
        return Err(ConfigError("uart pins: must be non-negative GPIO numbers"));
    }
    for (i, a) in pins.iter().enumerate() {
        if pins[i + 1..].contains(a) {
            return Err(ConfigError("uart pins: must be distinct"));
        }
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Parsing helpers
// ───────────────────────────────────────────────────────────────

fn fixed<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    let _ = out.push_str(s);
    out
}

fn bounded<const N: usize>(s: &str, err: &'static str) -> Result<heapless::String<N>, ConfigError> {
    let mut out = heapless::String::new();
    out.push_str(s).map_err(|_| ConfigError(err))?;
    Ok(out)
}

fn pin(value: Option<&str>, default: i32) -> Result<i32, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError("uart pin: not a number")),
    }
}
