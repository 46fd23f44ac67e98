//! Inbound asynchronous events.
//!
//! [`LinkEvent`]s come from the link driver's event context (IP stack /
//! PPP netif) and are consumed by the
//! [`ConnectivityGate`](crate::gate::ConnectivityGate).  [`BrokerEvent`]s
//! come from the MQTT client's event task and are consumed by the
//! [`SessionManager`](super::session::SessionManager).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Addressing obtained from DHCP (Wi-Fi) or IPCP (PPP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpInfo {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Primary and secondary DNS servers, when the peer supplied them.
    pub dns: [Option<IpAddr>; 2],
}

/// Link-layer events emitted by a [`LinkDriver`](super::ports::LinkDriver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    GotAddress(IpInfo),
    LostAddress,
    /// The PPP session was terminated by the user (hang-up / mode exit).
    UserInterrupted,
    GotIpv6(Ipv6Addr),
}

/// Broker-driven events delivered by an
/// [`MqttConnector`](super::ports::MqttConnector) client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    Disconnected,
    /// The broker acknowledged message `msg_id` (PUBACK for QoS 1).
    Published { msg_id: u32 },
    /// The client reported a transport or protocol error.
    Error,
}

/// Callback type the driver invokes for every link event.
pub type LinkEventHandler = Box<dyn Fn(LinkEvent) + Send + Sync + 'static>;

/// Callback type the MQTT client invokes for every broker event.
pub type BrokerEventHandler = Box<dyn Fn(BrokerEvent) + Send + Sync + 'static>;
