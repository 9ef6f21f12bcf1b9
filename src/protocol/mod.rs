//! MQTT message types and topic handling
//!
//! This module holds the transport-independent vocabulary of the session layer:
//! QoS levels, inbound messages and the topic/filter matcher.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
