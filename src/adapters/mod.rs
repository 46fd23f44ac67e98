//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                  |
//! |----------------|--------------------|------------------------------|
//! | `wifi`         | LinkDriver         | ESP-IDF WiFi STA             |
//! | `modem`        | LinkDriver         | AT modem on UART + PPP netif |
//! | `mqtt`         | MqttConnector      | ESP-IDF MQTT client          |
//! |                | MqttTransport      |                              |
//! | `time`         | Clock              | ESP32 system timer + SNTP    |
//! | `stub_sensors` | TelemetrySource    | Random values (no BMS/GPS)   |
//!
//! Supporting modules: `at` (typed AT commands on the `atat` client), `device_id` (MQTT client
//! id from the MAC), and on device `ip_events` (IP/PPP event bridge) and
//! `ppp` (esp-netif PPP glue).

pub mod at;
pub mod device_id;
#[cfg(target_os = "espidf")]
pub mod ip_events;
pub mod modem;
pub mod mqtt;
#[cfg(target_os = "espidf")]
pub mod ppp;
pub mod stub_sensors;
pub mod time;
pub mod wifi;
