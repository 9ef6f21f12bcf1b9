//! rumqttc-backed transport/session engine
//!
//! This module provides the production [`SessionEngine`](crate::transport::SessionEngine),
//! split into pure functions and a thin I/O layer for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure option building and reconnect configuration
//! - [`message_handler`] - Pure routing of rumqttc events to engine events
//! - [`health_monitor`] - Pure reconnection decisions
//! - [`engine`] - Impure I/O: the event loop task and request submission
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_dispatch::config::ClientConfig;
//! use mqtt_dispatch::transport::mqtt::RumqttcEngine;
//!
//! let config = ClientConfig::default().with_server("mqtt://localhost:1883");
//! let engine = RumqttcEngine::new("my-device", &config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod connection;
pub mod engine;
pub mod health_monitor;
pub mod message_handler;

pub use connection::{configure_mqtt_options, parse_server_uri, BrokerEndpoint, ReconnectConfig};
pub use engine::RumqttcEngine;
pub use health_monitor::{HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
