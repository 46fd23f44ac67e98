//! Unified error types for the tracker firmware.
//!
//! One small `Copy` enum per concern, each with a hand-written `Display`.
//! Everything that can abort bring-up converts into [`BootError`], which the
//! binary logs before restarting the device.

use core::fmt;

// ---------------------------------------------------------------------------
// Link (Wi-Fi / modem) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The driver or netif could not be initialised.
    InitFailed,
    /// The modem did not answer an AT command in time.
    Timeout,
    /// The modem answered `ERROR` or an unexpected response.
    CommandRejected,
    /// The SIM refused the configured PIN.
    PinRejected,
    /// A PIN is required but none is configured.
    PinRequired,
    /// Command-mode operation attempted after the switch to data mode.
    DataModeActive,
    /// Switching the transport into data mode failed.
    ModeSwitchFailed,
    /// Station connect to the access point failed.
    ConnectFailed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed => write!(f, "transport init failed"),
            Self::Timeout => write!(f, "modem response timeout"),
            Self::CommandRejected => write!(f, "modem rejected command"),
            Self::PinRejected => write!(f, "SIM PIN rejected"),
            Self::PinRequired => write!(f, "SIM PIN required but not configured"),
            Self::DataModeActive => write!(f, "command mode unavailable in data mode"),
            Self::ModeSwitchFailed => write!(f, "switch to data mode failed"),
            Self::ConnectFailed => write!(f, "station connect failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The MQTT client could not be created or started.
    TransportInit,
    /// A client is already live; only one handle may exist at a time.
    AlreadyStarted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportInit => write!(f, "MQTT transport init failed"),
            Self::AlreadyStarted => write!(f, "MQTT session already started"),
        }
    }
}

/// Errors returned by `SessionManager::publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// The session is not in the `Connected` state.
    NotConnected,
    /// The client refused to enqueue the message (outbox full, socket error).
    Transport,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "MQTT session not connected"),
            Self::Transport => write!(f, "MQTT transport rejected publish"),
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry encoding errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// A timestamp is outside the range representable as RFC3339.
    TimestampOutOfRange,
    /// The JSON serializer failed.
    Json,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimestampOutOfRange => write!(f, "timestamp out of range"),
            Self::Json => write!(f, "JSON serialization failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// A configuration value failed validation.
/// The `&'static str` names the field and the rule it broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigError(pub &'static str);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config: {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Bootstrap errors
// ---------------------------------------------------------------------------

/// Every fatal bring-up failure funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    Config(ConfigError),
    Link(LinkError),
    Session(SessionError),
    /// The publisher task could not be spawned.
    Spawn,
    /// A wait was interrupted by the cancellation token.
    Cancelled,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Session(e) => write!(f, "session: {e}"),
            Self::Spawn => write!(f, "publisher task spawn failed"),
            Self::Cancelled => write!(f, "bring-up cancelled"),
        }
    }
}

impl From<ConfigError> for BootError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<LinkError> for BootError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<SessionError> for BootError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl std::error::Error for LinkError {}
impl std::error::Error for SessionError {}
impl std::error::Error for PublishError {}
impl std::error::Error for EncodeError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for BootError {}
