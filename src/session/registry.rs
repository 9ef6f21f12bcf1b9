//! Ordered registry of topic subscriptions and event callbacks
//!
//! Entries are never removed and survive reconnects unchanged. Duplicate filters are
//! allowed; every matching entry fires, in registration order.

use crate::protocol::{topic_matches, InboundMessage, MessageId, QoS};
use crate::transport::TransportError;
use std::sync::Arc;

/// Receives `session_present` of a CONNECTED event
pub type ConnectCallback = Arc<dyn Fn(bool) + Send + Sync>;
/// Receives `session_present` of a DISCONNECTED event
pub type DisconnectCallback = Arc<dyn Fn(bool) + Send + Sync>;
/// Receives the message id of a SUBSCRIBED event
pub type SubscribeCallback = Arc<dyn Fn(MessageId) + Send + Sync>;
/// Receives the message id of an UNSUBSCRIBED event
pub type UnsubscribeCallback = Arc<dyn Fn(MessageId) + Send + Sync>;
/// Receives the message id of a PUBLISHED event
pub type PublishCallback = Arc<dyn Fn(MessageId) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// One message listener; `filter == None` is a global listener
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub filter: Option<String>,
    pub qos: QoS,
    pub callback: MessageCallback,
}

impl SubscriptionEntry {
    pub fn matches(&self, topic: &str) -> bool {
        self.filter
            .as_deref()
            .map_or(true, |filter| topic_matches(topic, filter))
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<SubscriptionEntry>,
    connect: Vec<ConnectCallback>,
    disconnect: Vec<DisconnectCallback>,
    subscribe: Vec<SubscribeCallback>,
    unsubscribe: Vec<UnsubscribeCallback>,
    publish: Vec<PublishCallback>,
    error: Vec<ErrorCallback>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, filter: Option<String>, qos: QoS, callback: MessageCallback) {
        self.entries.push(SubscriptionEntry {
            filter,
            qos,
            callback,
        });
    }

    pub fn add_connect_callback(&mut self, callback: ConnectCallback) {
        self.connect.push(callback);
    }

    pub fn add_disconnect_callback(&mut self, callback: DisconnectCallback) {
        self.disconnect.push(callback);
    }

    pub fn add_subscribe_callback(&mut self, callback: SubscribeCallback) {
        self.subscribe.push(callback);
    }

    pub fn add_unsubscribe_callback(&mut self, callback: UnsubscribeCallback) {
        self.unsubscribe.push(callback);
    }

    pub fn add_publish_callback(&mut self, callback: PublishCallback) {
        self.publish.push(callback);
    }

    pub fn add_error_callback(&mut self, callback: ErrorCallback) {
        self.error.push(callback);
    }

    pub fn entries(&self) -> &[SubscriptionEntry] {
        &self.entries
    }

    /// Filters to (re)subscribe, in registration order; global listeners are skipped
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.filter.clone().map(|filter| (filter, entry.qos)))
            .collect()
    }

    /// Callbacks of every entry matching `topic`, in registration order
    pub fn matching_callbacks(&self, topic: &str) -> Vec<MessageCallback> {
        self.entries
            .iter()
            .filter(|entry| entry.matches(topic))
            .map(|entry| entry.callback.clone())
            .collect()
    }

    pub fn connect_callbacks(&self) -> Vec<ConnectCallback> {
        self.connect.clone()
    }

    pub fn disconnect_callbacks(&self) -> Vec<DisconnectCallback> {
        self.disconnect.clone()
    }

    pub fn subscribe_callbacks(&self) -> Vec<SubscribeCallback> {
        self.subscribe.clone()
    }

    pub fn unsubscribe_callbacks(&self) -> Vec<UnsubscribeCallback> {
        self.unsubscribe.clone()
    }

    pub fn publish_callbacks(&self) -> Vec<PublishCallback> {
        self.publish.clone()
    }

    pub fn error_callbacks(&self) -> Vec<ErrorCallback> {
        self.error.clone()
    }
}
