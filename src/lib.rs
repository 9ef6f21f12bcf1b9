//! mqtt-dispatch - client-side MQTT session layer
//!
//! This crate sits on top of an MQTT transport/session engine and provides:
//! - Topic filter matching with `+` and `#` wildcards
//! - Reassembly of messages delivered in several fragments
//! - An ordered registry of topic listeners and event callbacks
//! - Automatic resubscription of every registered filter after each reconnect
//! - A production engine built on `rumqttc`, plus a mock engine for tests
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_dispatch::protocol::topic_matches;
//!
//! assert!(topic_matches("sport/tennis/player", "sport/+/player"));
//! assert!(topic_matches("sport", "sport/#"));
//! assert!(!topic_matches("sport/tennis/player/ranking", "sport/+/player"));
//! ```
//!
//! Driving a client with the mock engine:
//!
//! ```rust
//! use mqtt_dispatch::testing::MockEngine;
//! use mqtt_dispatch::transport::{DataFragment, EngineEvent};
//! use mqtt_dispatch::{ClientConfig, MqttClient, QoS};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MockEngine::new());
//! let config = ClientConfig::default().with_server("mqtt://localhost:1883");
//! let client = MqttClient::with_engine(config, engine.clone());
//!
//! client.on_topic("sensors/#", QoS::AtLeastOnce, |message| {
//!     assert_eq!(message.topic, "sensors/kitchen");
//! });
//! client.connect().unwrap();
//!
//! engine.emit(EngineEvent::Connected { session_present: false });
//! assert_eq!(engine.subscriptions(), vec![("sensors/#".to_string(), QoS::AtLeastOnce)]);
//!
//! let reading = DataFragment::complete("sensors/kitchen", "21.5", QoS::AtLeastOnce);
//! engine.emit(EngineEvent::Data(reading));
//! assert_eq!(client.metrics().events.messages_delivered, 1);
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use client::MqttClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use protocol::{topic_matches, InboundMessage, MessageId, PublishMode, QoS};
pub use session::ConnectionState;
pub use transport::{EngineEvent, SessionEngine, TransportError};
