//! Message types shared by the dispatcher, the engines and the application
//!
//! These types are deliberately independent of any MQTT library so the core can be driven
//! by the rumqttc engine in production and by a mock engine in tests.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MQTT packet identifier as reported by the engine
pub type MessageId = u16;

/// Quality of Service levels for MQTT messages
///
/// # Examples
/// ```
/// use mqtt_dispatch::protocol::QoS;
///
/// assert_eq!(QoS::try_from(1u8), Ok(QoS::AtLeastOnce));
/// assert_eq!(u8::from(QoS::ExactlyOnce), 2);
/// assert!(QoS::try_from(3u8).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce = 0,
    /// Acknowledged delivery, duplicates possible
    AtLeastOnce = 1,
    /// Assured single delivery
    ExactlyOnce = 2,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid QoS level: {0} (expected 0, 1 or 2)")]
pub struct InvalidQoS(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl std::fmt::Display for QoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// A complete message handed to message callbacks
///
/// Fragmented deliveries are reassembled before an `InboundMessage` is built, so
/// `payload` always holds the whole application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
    pub qos: QoS,
    pub dup: bool,
}

impl InboundMessage {
    /// Payload interpreted as UTF-8, replacing invalid sequences
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// How a publish request is handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Queue the message in the engine's outbox and return immediately
    #[default]
    Enqueue,
    /// Ask the engine to write the message right away
    Immediate,
}

impl PublishMode {
    /// Map the `async` flag of the classic publish signature to a mode
    pub fn from_async_flag(is_async: bool) -> Self {
        if is_async {
            PublishMode::Enqueue
        } else {
            PublishMode::Immediate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_conversions() {
        for level in 0u8..=2 {
            let qos = QoS::try_from(level).unwrap();
            assert_eq!(u8::from(qos), level);
            assert_eq!(QoS::from(rumqttc::QoS::from(qos)), qos);
        }
        assert_eq!(QoS::try_from(7), Err(InvalidQoS(7)));
    }

    #[test]
    fn test_qos_serde_as_integer() {
        #[derive(Deserialize, Serialize)]
        struct Holder {
            qos: QoS,
        }

        let holder: Holder = toml::from_str("qos = 2").unwrap();
        assert_eq!(holder.qos, QoS::ExactlyOnce);
        assert!(toml::from_str::<Holder>("qos = 5").is_err());
        assert_eq!(toml::to_string(&holder).unwrap().trim(), "qos = 2");
    }

    #[test]
    fn test_payload_str_is_lossy() {
        let message = InboundMessage {
            topic: "sensors/raw".to_string(),
            payload: Bytes::from_static(b"ok\xff"),
            retain: false,
            qos: QoS::AtMostOnce,
            dup: false,
        };
        assert_eq!(message.payload_str(), "ok\u{fffd}");
    }

    #[test]
    fn test_publish_mode_from_async_flag() {
        assert_eq!(PublishMode::from_async_flag(true), PublishMode::Enqueue);
        assert_eq!(PublishMode::from_async_flag(false), PublishMode::Immediate);
    }
}
