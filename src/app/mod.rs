//! Application core: link bring-up, MQTT session and periodic publishing.
//!
//! Nothing in here touches hardware directly.  Devices are reached
//! through the **port traits** in [`ports`], so the whole state machine
//! runs on the host against scripted mocks.

pub mod bootstrap;
pub mod events;
pub mod ports;
pub mod publisher;
pub mod session;
