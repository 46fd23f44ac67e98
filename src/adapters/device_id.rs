//! Tracker identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable MQTT client id of the form `biketrack-xxyyzz` (last 3
//! bytes of the 6-byte MAC in lowercase hex).  Deterministic across reboots
//! so the broker sees one persistent session per tracker.

use core::fmt::Write;

use super::mqtt::ClientId;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: `mac` is a 6-byte out-parameter as the API requires.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0x24, 0x6F, 0x28, 0xB1, 0x6E, 0x0C]
}

/// MQTT client id from the last 3 MAC bytes, e.g. `biketrack-b16e0c`.
pub fn client_id(mac: &MacAddress) -> ClientId {
    let mut id = ClientId::new();
    // 16 characters always fit.
    let _ = write!(id, "biketrack-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    id
}
