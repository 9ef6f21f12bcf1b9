//! Transport/session engine abstraction
//!
//! The session layer never touches sockets. It talks to an engine that owns the network
//! connection, keepalive, retries and QoS handshakes, and that reports what happened as a
//! stream of normalized [`EngineEvent`]s.
//!
//! Events are delivered to an [`EventSink`] on a single context owned by the engine. The
//! dispatcher relies on that: it handles one event at a time and runs user callbacks inline.

use crate::protocol::{MessageId, PublishMode, QoS};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

/// Closure receiving every engine event, in order, on the engine's event context
pub type EventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// One chunk of an incoming PUBLISH as delivered by the engine
///
/// The chunk length is `payload.len()`. Engines that deliver whole messages emit a single
/// fragment with `offset == 0` and `total_len == payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragment {
    /// Topic name; continuation chunks may leave it empty
    pub topic: String,
    pub payload: Bytes,
    pub total_len: usize,
    pub offset: usize,
    pub retain: bool,
    pub qos: QoS,
    pub dup: bool,
}

impl DataFragment {
    /// A fragment carrying an entire message
    pub fn complete(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        let payload = payload.into();
        Self {
            topic: topic.into(),
            total_len: payload.len(),
            payload,
            offset: 0,
            retain: false,
            qos,
            dup: false,
        }
    }

    pub fn chunk_len(&self) -> usize {
        self.payload.len()
    }
}

/// Category of a transport failure reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Socket, TLS or DNS level failure
    Transport,
    /// Broker answered CONNECT with a refusal
    ConnectionRefused,
    /// Malformed traffic or protocol state violation
    Protocol,
}

/// Details of an engine ERROR event, forwarded verbatim to error callbacks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Normalized events emitted by an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Connected { session_present: bool },
    Disconnected { session_present: bool },
    Subscribed(MessageId),
    Unsubscribed(MessageId),
    Published(MessageId),
    Data(DataFragment),
    Error(TransportError),
}

impl EngineEvent {
    /// Short name used in logs and spans
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Connected { .. } => "connected",
            EngineEvent::Disconnected { .. } => "disconnected",
            EngineEvent::Subscribed(_) => "subscribed",
            EngineEvent::Unsubscribed(_) => "unsubscribed",
            EngineEvent::Published(_) => "published",
            EngineEvent::Data(_) => "data",
            EngineEvent::Error(_) => "error",
        }
    }
}

/// Failures of engine requests
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not started")]
    NotStarted,
    #[error("Engine already running")]
    AlreadyRunning,
    #[error("No tokio runtime available to drive the engine")]
    NoRuntime,
    #[error("Request rejected by engine")]
    RequestRejected(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Engine error: {0}")]
    Other(String),
}

/// Primitives the session layer consumes from a transport/session engine
///
/// Request methods return `Ok(Some(id))` when the engine knows the packet identifier
/// right away and `Ok(None)` when it assigns one later (the matching SUBSCRIBED /
/// UNSUBSCRIBED / PUBLISHED event still carries it).
pub trait SessionEngine: Send + Sync {
    /// Start the connection and begin delivering events to `sink`
    fn connect(&self, sink: EventSink) -> Result<(), EngineError>;

    /// Request a graceful disconnect; a DISCONNECTED event follows
    fn disconnect(&self) -> Result<(), EngineError>;

    /// Tear the engine down without waiting for the broker
    fn stop(&self);

    /// The engine's own view of the link, for diagnostics only
    ///
    /// The session layer tracks connection state from CONNECTED / DISCONNECTED / ERROR
    /// events and never consults this, so it may briefly disagree with
    /// `MqttClient::connected()`.
    fn is_connected(&self) -> bool;

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<Option<MessageId>, EngineError>;

    fn unsubscribe(&self, filter: &str) -> Result<Option<MessageId>, EngineError>;

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
        mode: PublishMode,
    ) -> Result<Option<MessageId>, EngineError>;
}

/// Type alias for the production engine
pub type MqttEngine = mqtt::RumqttcEngine;
