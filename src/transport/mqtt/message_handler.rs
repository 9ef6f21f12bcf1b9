//! Pure routing of rumqttc events to normalized engine events

use crate::transport::{DataFragment, EngineEvent, TransportError, TransportErrorKind};
use rumqttc::{ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};
use tracing::warn;

/// Routing decision for one rumqttc event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Forward to the session layer
    Deliver(EngineEvent),
    /// The client's own DISCONNECT went out; the connection is closing
    LocalDisconnect,
    /// Keepalive and other housekeeping traffic
    Ignored(String),
}

/// Pure routing decisions based on rumqttc events
pub struct MessageHandler;

impl MessageHandler {
    /// Route a rumqttc event (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(ack) => EventRoute::Deliver(EngineEvent::Connected {
                    session_present: ack.session_present,
                }),
                Packet::Publish(publish) => {
                    EventRoute::Deliver(EngineEvent::Data(DataFragment {
                        topic: publish.topic.clone(),
                        total_len: publish.payload.len(),
                        payload: publish.payload.clone(),
                        offset: 0,
                        retain: publish.retain,
                        qos: publish.qos.into(),
                        dup: publish.dup,
                    }))
                }
                Packet::SubAck(suback) => {
                    if Self::has_failed_subscription(&suback.return_codes) {
                        warn!(
                            "Broker rejected subscription {}: {:?}",
                            suback.pkid, suback.return_codes
                        );
                    }
                    EventRoute::Deliver(EngineEvent::Subscribed(suback.pkid))
                }
                Packet::UnsubAck(unsuback) => {
                    EventRoute::Deliver(EngineEvent::Unsubscribed(unsuback.pkid))
                }
                Packet::PubAck(puback) => EventRoute::Deliver(EngineEvent::Published(puback.pkid)),
                Packet::PubComp(pubcomp) => {
                    EventRoute::Deliver(EngineEvent::Published(pubcomp.pkid))
                }
                Packet::Disconnect => EventRoute::Deliver(EngineEvent::Disconnected {
                    session_present: false,
                }),
                other => EventRoute::Ignored(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::LocalDisconnect,
            Event::Outgoing(outgoing) => EventRoute::Ignored(format!("{outgoing:?}")),
        }
    }

    /// Classify an event loop failure (pure function)
    pub fn classify_connection_error(error: &ConnectionError) -> TransportError {
        let kind = match error {
            ConnectionError::ConnectionRefused(_) => TransportErrorKind::ConnectionRefused,
            ConnectionError::MqttState(_) | ConnectionError::NotConnAck(_) => {
                TransportErrorKind::Protocol
            }
            _ => TransportErrorKind::Transport,
        };
        TransportError::new(kind, error.to_string())
    }

    /// Any SUBACK return code signalling failure (pure function)
    pub fn has_failed_subscription(return_codes: &[SubscribeReasonCode]) -> bool {
        return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    }
}
