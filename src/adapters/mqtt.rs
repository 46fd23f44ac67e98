//! MQTT client adapter.
//!
//! Implements [`MqttConnector`] / [`MqttTransport`] on the ESP-IDF MQTT
//! client.  The client runs its own event task; every event it raises is
//! translated to a [`BrokerEvent`] and handed to the session's handler.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`
//!   with a callback-style event handler.
//! - **all other targets**: an in-process loopback broker that accepts
//!   every publish and acknowledges it immediately.

use std::sync::Mutex;

use log::{error, info};

use crate::app::events::{BrokerEvent, BrokerEventHandler};
use crate::app::ports::{MqttConnector, MqttTransport, QoS};
use crate::error::{PublishError, SessionError};

pub type ClientId = heapless::String<32>;

/// Creates one MQTT client per `connect` call.
pub struct MqttClientConnector {
    client_id: ClientId,
}

impl MqttClientConnector {
    pub fn new(client_id: ClientId) -> Self {
        Self { client_id }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF client
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod platform {
    use esp_idf_svc::mqtt::client::{
        EspMqttClient, EventPayload, MqttClientConfiguration, QoS as EspQoS,
    };
    use log::warn;

    use super::*;

    impl From<QoS> for EspQoS {
        fn from(qos: QoS) -> Self {
            match qos {
                QoS::AtMostOnce => EspQoS::AtMostOnce,
                QoS::AtLeastOnce => EspQoS::AtLeastOnce,
                QoS::ExactlyOnce => EspQoS::ExactlyOnce,
            }
        }
    }

    pub struct EspTransport {
        client: Mutex<EspMqttClient<'static>>,
    }

    impl MqttTransport for EspTransport {
        fn publish(
            &self,
            topic: &str,
            payload: &[u8],
            qos: QoS,
            retain: bool,
        ) -> Result<u32, PublishError> {
            let mut client = self
                .client
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            client
                .publish(topic, qos.into(), retain, payload)
                .map_err(|e| {
                    warn!("MQTT: publish to {} refused: {}", topic, e);
                    PublishError::Transport
                })
        }
    }

    pub fn connect(
        client_id: &str,
        broker_uri: &str,
        on_event: BrokerEventHandler,
    ) -> Result<Box<dyn MqttTransport>, SessionError> {
        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            ..Default::default()
        };
        let client = EspMqttClient::new_cb(broker_uri, &conf, move |event| {
            let translated = match event.payload() {
                EventPayload::Connected(_) => Some(BrokerEvent::Connected),
                EventPayload::Disconnected => Some(BrokerEvent::Disconnected),
                EventPayload::Published(msg_id) => Some(BrokerEvent::Published { msg_id }),
                EventPayload::Error(_) => Some(BrokerEvent::Error),
                _ => None,
            };
            if let Some(event) = translated {
                on_event(event);
            }
        })
        .map_err(|e| {
            error!("MQTT: client init failed: {}", e);
            SessionError::TransportInit
        })?;

        Ok(Box::new(EspTransport {
            client: Mutex::new(client),
        }))
    }
}

// ───────────────────────────────────────────────────────────────
// Loopback client (host)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod platform {
    use std::sync::Arc;

    use super::*;

    /// Accepts everything and acknowledges synchronously.
    pub struct LoopbackTransport {
        on_event: Arc<BrokerEventHandler>,
        next_id: Mutex<u32>,
    }

    impl MqttTransport for LoopbackTransport {
        fn publish(
            &self,
            topic: &str,
            payload: &[u8],
            _qos: QoS,
            _retain: bool,
        ) -> Result<u32, PublishError> {
            let msg_id = {
                let mut next = self
                    .next_id
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                *next = next.wrapping_add(1);
                *next
            };
            log::debug!("MQTT(sim): {} <- {} bytes", topic, payload.len());
            (self.on_event)(BrokerEvent::Published { msg_id });
            Ok(msg_id)
        }
    }

    pub fn connect(
        _client_id: &str,
        broker_uri: &str,
        on_event: BrokerEventHandler,
    ) -> Result<Box<dyn MqttTransport>, SessionError> {
        if broker_uri.is_empty() {
            error!("MQTT(sim): empty broker URI");
            return Err(SessionError::TransportInit);
        }
        let on_event = Arc::new(on_event);
        on_event(BrokerEvent::Connected);
        Ok(Box::new(LoopbackTransport {
            on_event,
            next_id: Mutex::new(0),
        }))
    }
}

impl MqttConnector for MqttClientConnector {
    fn connect(
        &mut self,
        broker_uri: &str,
        on_event: BrokerEventHandler,
    ) -> Result<Box<dyn MqttTransport>, SessionError> {
        info!("MQTT: client '{}' -> {}", self.client_id, broker_uri);
        platform::connect(&self.client_id, broker_uri, on_event)
    }
}
