//! Client-side MQTT session layer
//!
//! The session layer sits between the application and a [`SessionEngine`]. It keeps the
//! registry of topic filters and callbacks, reassembles fragmented deliveries, matches
//! complete messages against the registry and reissues every subscription after a
//! reconnect.
//!
//! [`SessionEngine`]: crate::transport::SessionEngine

pub mod dispatcher;
pub mod reassembly;
pub mod registry;

pub use dispatcher::EventDispatcher;
pub use reassembly::{FragmentReassembler, ReassemblyError};
pub use registry::{
    ConnectCallback, DisconnectCallback, ErrorCallback, MessageCallback, PublishCallback,
    SubscribeCallback, SubscriptionEntry, SubscriptionRegistry, UnsubscribeCallback,
};

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Connection state as seen by the session layer
///
/// Driven by engine events; `connect()` moves it to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Lock a mutex, recovering the data if a callback panicked while it was held
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
