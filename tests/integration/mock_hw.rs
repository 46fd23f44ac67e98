//! Mock link and broker adapters for integration tests.
//!
//! Records every driver call so tests can assert on the full bring-up
//! history without a modem, a radio or a broker.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use biketrack::app::events::{
    BrokerEvent, BrokerEventHandler, IpInfo, LinkEvent, LinkEventHandler,
};
use biketrack::app::ports::{LinkDriver, MqttConnector, MqttTransport, QoS, SignalQuality};
use biketrack::error::{LinkError, PublishError, SessionError};

// ── Link call record ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Start,
    SimPinRequired,
    UnlockSim(String),
    SignalQuality,
    EnterDataMode,
}

pub fn sample_ip() -> IpInfo {
    IpInfo {
        addr: Ipv4Addr::new(10, 0, 0, 42),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Ipv4Addr::new(10, 0, 0, 1),
        dns: [Some(Ipv4Addr::new(1, 1, 1, 1).into()), None],
    }
}

/// Handle for delivering link events from another thread.
#[derive(Clone, Default)]
pub struct LinkEmitter(Arc<Mutex<Option<LinkEventHandler>>>);

#[allow(dead_code)]
impl LinkEmitter {
    /// `false` if the driver was never started.
    pub fn emit(&self, event: LinkEvent) -> bool {
        match self.0.lock().unwrap().as_ref() {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

// ── MockLink ──────────────────────────────────────────────────

pub struct MockLink {
    pub calls: Vec<LinkCall>,
    emitter: LinkEmitter,
    /// SIM reports PIN required.
    pub pin_required: bool,
    /// Number of unlock attempts to reject before accepting.
    pub pin_rejections: u32,
    pub fail_start: bool,
    pub fail_mode_switch: bool,
    /// Deliver `GotAddress` from inside `enter_data_mode`.
    pub address_on_connect: bool,
    pub signal: Option<SignalQuality>,
    data_mode: bool,
}

#[allow(dead_code)]
impl MockLink {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            emitter: LinkEmitter::default(),
            pin_required: false,
            pin_rejections: 0,
            fail_start: false,
            fail_mode_switch: false,
            address_on_connect: true,
            signal: Some(SignalQuality {
                rssi: Some(20),
                ber: Some(0),
            }),
            data_mode: false,
        }
    }

    pub fn emitter(&self) -> LinkEmitter {
        self.emitter.clone()
    }

    pub fn unlock_attempts(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, LinkCall::UnlockSim(_)))
            .count()
    }

    fn command_mode(&self) -> Result<(), LinkError> {
        if self.data_mode {
            Err(LinkError::DataModeActive)
        } else {
            Ok(())
        }
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDriver for MockLink {
    fn start(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError> {
        self.calls.push(LinkCall::Start);
        if self.fail_start {
            return Err(LinkError::InitFailed);
        }
        *self.emitter.0.lock().unwrap() = Some(on_event);
        Ok(())
    }

    fn sim_pin_required(&mut self) -> Result<bool, LinkError> {
        self.calls.push(LinkCall::SimPinRequired);
        self.command_mode()?;
        Ok(self.pin_required)
    }

    fn unlock_sim(&mut self, pin: &str) -> Result<(), LinkError> {
        self.calls.push(LinkCall::UnlockSim(pin.to_owned()));
        self.command_mode()?;
        if self.pin_rejections > 0 {
            self.pin_rejections -= 1;
            return Err(LinkError::PinRejected);
        }
        self.pin_required = false;
        Ok(())
    }

    fn signal_quality(&mut self) -> Result<Option<SignalQuality>, LinkError> {
        self.calls.push(LinkCall::SignalQuality);
        self.command_mode()?;
        Ok(self.signal)
    }

    fn enter_data_mode(&mut self) -> Result<(), LinkError> {
        self.calls.push(LinkCall::EnterDataMode);
        self.command_mode()?;
        if self.fail_mode_switch {
            return Err(LinkError::ModeSwitchFailed);
        }
        self.data_mode = true;
        if self.address_on_connect {
            self.emitter.emit(LinkEvent::GotAddress(sample_ip()));
        }
        Ok(())
    }
}

// ── MockBroker ────────────────────────────────────────────────

/// One recorded publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Shared broker-side view of everything the client sent.
#[derive(Clone, Default)]
pub struct BrokerLog(Arc<Mutex<Vec<Published>>>);

#[allow(dead_code)]
impl BrokerLog {
    pub fn topics(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|p| p.topic.clone()).collect()
    }

    pub fn all(&self) -> Vec<Published> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

struct MockClient {
    log: BrokerLog,
    on_event: BrokerEventHandler,
    acknowledge: bool,
}

impl MqttTransport for MockClient {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<u32, PublishError> {
        let msg_id = {
            let mut log = self.log.0.lock().unwrap();
            log.push(Published {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
                qos,
                retain,
            });
            log.len() as u32
        };
        if self.acknowledge {
            (self.on_event)(BrokerEvent::Published { msg_id });
        }
        Ok(msg_id)
    }
}

pub struct MockConnector {
    pub log: BrokerLog,
    pub connects: usize,
    pub fail_init: bool,
    /// Raise `Connected` from inside `connect`.
    pub connect_immediately: bool,
    /// Raise `Published` for every accepted publish.
    pub acknowledge: bool,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new() -> Self {
        Self {
            log: BrokerLog::default(),
            connects: 0,
            fail_init: false,
            connect_immediately: true,
            acknowledge: true,
        }
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttConnector for MockConnector {
    fn connect(
        &mut self,
        _broker_uri: &str,
        on_event: BrokerEventHandler,
    ) -> Result<Box<dyn MqttTransport>, SessionError> {
        self.connects += 1;
        if self.fail_init {
            return Err(SessionError::TransportInit);
        }
        if self.connect_immediately {
            on_event(BrokerEvent::Connected);
        }
        Ok(Box::new(MockClient {
            log: self.log.clone(),
            on_event,
            acknowledge: self.acknowledge,
        }))
    }
}
