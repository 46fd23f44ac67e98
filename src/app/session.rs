//! MQTT session manager.
//!
//! Owns the single live client handle.  State moves only on broker events
//! (plus `Connecting` on start and `Uninitialized` on teardown) and is
//! stored atomically, so the broker event task and publishing tasks never
//! share anything but this type's methods.
//!
//! Each `start()` opens a new generation; `stop()` closes it.  Events from
//! a handler of an older generation are dropped, so a torn-down client
//! can never move the state of the live one.
//!
//! ```text
//!   Uninitialized ──start()──▶ Connecting ──Connected──▶ Connected
//!                                              ▲              │
//!                                  Connected   │              │ Disconnected
//!                                              └─ Disconnected ◀┘
//! ```

use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};

use crate::error::{EncodeError, PublishError, SessionError};
use crate::gate::{ConnectivityGate, GateFlag};
use crate::telemetry::TelemetrySample;

use super::events::{BrokerEvent, BrokerEventHandler};
use super::ports::{MqttConnector, MqttTransport, QoS};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MqttState {
    Uninitialized = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
}

impl MqttState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnected,
            _ => Self::Uninitialized,
        }
    }
}

/// One outbound message.  Moved into [`SessionManager::publish`]; the
/// payload buffer is released when that call returns, on every path.
#[derive(Debug, PartialEq, Eq)]
pub struct PublishJob {
    pub topic: &'static str,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishJob {
    /// Telemetry jobs go to the sample's fixed topic at QoS 1, not retained.
    pub fn for_sample(sample: &TelemetrySample) -> Result<Self, EncodeError> {
        Ok(Self {
            topic: sample.topic(),
            payload: sample.to_json()?,
            qos: QoS::AtLeastOnce,
            retain: false,
        })
    }
}

/// Anything that can take a [`PublishJob`].  Implemented by
/// [`SessionManager`]; the publisher is generic over it.
pub trait PublishSink {
    fn publish(&self, job: PublishJob) -> Result<u32, PublishError>;
}

// ───────────────────────────────────────────────────────────────
// Shared state (reachable from the broker event handler)
// ───────────────────────────────────────────────────────────────

struct SessionShared {
    state: AtomicU8,
    acks: AtomicU64,
    /// Generation of the live client; state transitions happen under it.
    generation: Mutex<u64>,
    gate: Arc<ConnectivityGate>,
}

impl SessionShared {
    fn state(&self) -> MqttState {
        MqttState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: MqttState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new generation; handlers of earlier ones go stale.
    fn advance(&self, state: MqttState) -> u64 {
        let mut generation = self.generation();
        *generation += 1;
        self.set_state(state);
        *generation
    }

    fn handle(&self, from: u64, event: BrokerEvent) {
        let current = self.generation();
        if *current != from {
            debug!(
                "Session: dropping {:?} from stale client (gen {}, live {})",
                event, from, *current
            );
            return;
        }
        match event {
            BrokerEvent::Connected => {
                self.set_state(MqttState::Connected);
                info!("Session: MQTT connected");
            }
            BrokerEvent::Disconnected => {
                self.set_state(MqttState::Disconnected);
                warn!("Session: MQTT disconnected");
            }
            BrokerEvent::Published { msg_id } => {
                self.acks.fetch_add(1, Ordering::Relaxed);
                debug!("Session: published, msg_id={}", msg_id);
                if !self.gate.is_set(GateFlag::DataReady) && self.gate.mark_data_ready() {
                    info!("Session: first publish acknowledged, data path ready");
                }
            }
            BrokerEvent::Error => {
                warn!("Session: MQTT client error");
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// SessionManager
// ───────────────────────────────────────────────────────────────

pub struct SessionManager {
    shared: Arc<SessionShared>,
    client: Mutex<Option<Arc<dyn MqttTransport>>>,
}

impl SessionManager {
    pub fn new(gate: Arc<ConnectivityGate>) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                state: AtomicU8::new(MqttState::Uninitialized as u8),
                acks: AtomicU64::new(0),
                generation: Mutex::new(0),
                gate,
            }),
            client: Mutex::new(None),
        }
    }

    /// Create and start the client.  The broker-event handler registered
    /// here lives exactly as long as the client.
    pub fn start<M: MqttConnector + ?Sized>(
        &self,
        connector: &mut M,
        broker_uri: &str,
    ) -> Result<(), SessionError> {
        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(SessionError::AlreadyStarted);
        }

        info!("Session: connecting to {}", broker_uri);
        let generation = self.shared.advance(MqttState::Connecting);

        let shared = Arc::clone(&self.shared);
        let handler: BrokerEventHandler = Box::new(move |event| shared.handle(generation, event));

        match connector.connect(broker_uri, handler) {
            Ok(client) => {
                *slot = Some(Arc::from(client));
                Ok(())
            }
            Err(e) => {
                self.shared.advance(MqttState::Uninitialized);
                error!("Session: client start failed: {}", e);
                Err(e)
            }
        }
    }

    /// Publish one job.  Fails fast with [`PublishError::NotConnected`]
    /// unless the session is `Connected`; otherwise only the transport's
    /// own queuing can delay the caller.
    pub fn publish(&self, job: PublishJob) -> Result<u32, PublishError> {
        if self.state() != MqttState::Connected {
            return Err(PublishError::NotConnected);
        }
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PublishError::NotConnected)?;
        client.publish(job.topic, &job.payload, job.qos, job.retain)
    }

    /// Tear down the client.  Further publishes fail with `NotConnected`.
    pub fn stop(&self) {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if client.is_some() {
            info!("Session: client stopped");
        }
        self.shared.advance(MqttState::Uninitialized);
    }

    pub fn state(&self) -> MqttState {
        self.shared.state()
    }

    /// Broker acknowledgements received since start.
    pub fn acknowledged(&self) -> u64 {
        self.shared.acks.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("acknowledged", &self.acknowledged())
            .finish_non_exhaustive()
    }
}

impl PublishSink for SessionManager {
    fn publish(&self, job: PublishJob) -> Result<u32, PublishError> {
        SessionManager::publish(self, job)
    }
}
