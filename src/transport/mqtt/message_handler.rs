//! Pure message routing for MQTT events plus the inbound router
//!
//! The routing half classifies raw rumqttc events; the router half decodes
//! platform responses and hands acknowledgements to the handler channel.

use crate::acknowledgement::AcknowledgementEvent;
use crate::observability::metrics::metrics;
use crate::protocol::ResponseEnvelope;
use rumqttc::{ConnectReturnCode, Event, Packet, SubscribeReasonCode};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) if connack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged
                }
                Packet::ConnAck(connack) => EventRoute::ConnectionRefused(format!("{:?}", connack.code)),
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failed: suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure)),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    /// ConnAck with a non-success return code
    ConnectionRefused(String),
    MessageReceived { topic: String, payload: Vec<u8> },
    Disconnected,
    SubscriptionConfirmed { packet_id: u16, failed: bool },
    /// PingResp and friends
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// What the router did with an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundDisposition {
    /// Forwarded to the acknowledgement handler
    Acknowledgement { message_id: String },
    /// Decoded, but nothing in the core waits for it
    Ignored,
    /// Not a platform response
    Unknown,
}

/// Shared by every client's event loop
#[derive(Debug, Clone)]
pub struct InboundRouter {
    acknowledgements: mpsc::Sender<AcknowledgementEvent>,
}

impl InboundRouter {
    pub fn new(acknowledgements: mpsc::Sender<AcknowledgementEvent>) -> Self {
        Self { acknowledgements }
    }

    pub async fn route(&self, topic: &str, payload: &[u8]) -> InboundDisposition {
        metrics().message_arrived();
        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);

        let envelope = match ResponseEnvelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics().unknown_message();
                warn!("Could not decode message on '{}': {}", topic, e);
                return InboundDisposition::Unknown;
            }
        };

        if !envelope.response_type.is_acknowledgement() {
            debug!(
                "Ignoring {:?} for message '{}'.",
                envelope.response_type, envelope.application_message_id
            );
            return InboundDisposition::Ignored;
        }

        let message_id = envelope.application_message_id.clone();
        if self
            .acknowledgements
            .send(AcknowledgementEvent::new(envelope))
            .await
            .is_err()
        {
            warn!("Acknowledgement handler is gone, dropping ACK for '{}'.", message_id);
            return InboundDisposition::Ignored;
        }
        InboundDisposition::Acknowledgement { message_id }
    }
}
