//! Application-facing MQTT client
//!
//! [`MqttClient`] ties a [`ClientConfig`], an [`EventDispatcher`] and an engine together.
//! Callbacks and topic listeners can be registered at any time; listeners registered
//! before the first connect are subscribed as soon as the broker accepts the connection,
//! and every listener is subscribed again after each reconnect.
//!
//! # Examples
//!
//! ```no_run
//! use mqtt_dispatch::{ClientConfig, MqttClient, PublishMode, QoS};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default().with_server("mqtt://localhost:1883");
//! let client = MqttClient::new(config);
//!
//! client
//!     .on_connect(|session_present| println!("connected, session_present={session_present}"))
//!     .on_topic("sensors/+/temperature", QoS::AtLeastOnce, |message| {
//!         println!("{} = {}", message.topic, message.payload_str());
//!     });
//!
//! client.connect()?;
//! let topic = "sensors/kitchen/temperature";
//! client.publish(topic, QoS::AtLeastOnce, false, "21.5", PublishMode::Enqueue)?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::observability::{MetricsSnapshot, SessionMetrics};
use crate::protocol::{InboundMessage, MessageId, PublishMode, QoS};
use crate::session::{ConnectionState, EventDispatcher};
use crate::transport::{MqttEngine, SessionEngine, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Poll interval while `disconnect()` waits for the DISCONNECTED event
const DISCONNECT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Client id used when the configuration does not set one
pub fn generate_client_id() -> String {
    format!("mqtt-dispatch-{}", Uuid::new_v4().simple())
}

/// MQTT client session; cheap to clone, clones share the same session
#[derive(Clone)]
pub struct MqttClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    client_id: String,
    config: ClientConfig,
    dispatcher: Arc<EventDispatcher>,
}

impl MqttClient {
    /// Client backed by the rumqttc engine, created on the first `connect()`
    pub fn new(config: ClientConfig) -> Self {
        let client_id = config
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id);
        // Fragmented messages are bounded like whole packets
        let dispatcher = Arc::new(EventDispatcher::with_max_message_len(
            Arc::new(SessionMetrics::new()),
            config.mqtt.max_packet_size,
        ));

        Self {
            inner: Arc::new(ClientInner {
                client_id,
                config,
                dispatcher,
            }),
        }
    }

    /// Client driven by a caller-supplied engine
    pub fn with_engine(config: ClientConfig, engine: Arc<dyn SessionEngine>) -> Self {
        let client = Self::new(config);
        client.inner.dispatcher.set_engine(engine);
        client
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn connected(&self) -> bool {
        self.inner.dispatcher.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.dispatcher.state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.dispatcher.metrics().snapshot()
    }

    pub fn on_connect(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> &Self {
        self.inner
            .dispatcher
            .with_registry(|registry| registry.add_connect_callback(Arc::new(callback)));
        self
    }

    pub fn on_disconnect(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> &Self {
        self.inner
            .dispatcher
            .with_registry(|registry| registry.add_disconnect_callback(Arc::new(callback)));
        self
    }

    pub fn on_subscribe(&self, callback: impl Fn(MessageId) + Send + Sync + 'static) -> &Self {
        self.inner
            .dispatcher
            .with_registry(|registry| registry.add_subscribe_callback(Arc::new(callback)));
        self
    }

    pub fn on_unsubscribe(&self, callback: impl Fn(MessageId) + Send + Sync + 'static) -> &Self {
        self.inner
            .dispatcher
            .with_registry(|registry| registry.add_unsubscribe_callback(Arc::new(callback)));
        self
    }

    pub fn on_publish(&self, callback: impl Fn(MessageId) + Send + Sync + 'static) -> &Self {
        self.inner
            .dispatcher
            .with_registry(|registry| registry.add_publish_callback(Arc::new(callback)));
        self
    }

    pub fn on_error(
        &self,
        callback: impl Fn(&TransportError) + Send + Sync + 'static,
    ) -> &Self {
        self.inner
            .dispatcher
            .with_registry(|registry| registry.add_error_callback(Arc::new(callback)));
        self
    }

    /// Listen to every incoming message, whatever its topic
    pub fn on_message(
        &self,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> &Self {
        self.inner
            .dispatcher
            .register_filter(None, QoS::AtMostOnce, Arc::new(callback));
        self
    }

    /// Listen to messages matching `filter`; subscribes now if connected, and after every
    /// reconnect
    pub fn on_topic(
        &self,
        filter: impl Into<String>,
        qos: QoS,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> &Self {
        self.inner
            .dispatcher
            .register_filter(Some(filter.into()), qos, Arc::new(callback));
        self
    }

    /// One-off subscribe; not remembered for reconnects (use `on_topic` for that)
    pub fn subscribe(&self, filter: &str, qos: QoS) -> ClientResult<Option<MessageId>> {
        self.inner.dispatcher.subscribe(filter, qos)
    }

    pub fn unsubscribe(&self, filter: &str) -> ClientResult<Option<MessageId>> {
        self.inner.dispatcher.unsubscribe(filter)
    }

    /// Publish `payload`; QoS 0 fails with [`ClientError::NotConnected`] while
    /// disconnected, QoS 1/2 are queued by the engine
    pub fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: impl AsRef<[u8]>,
        mode: PublishMode,
    ) -> ClientResult<Option<MessageId>> {
        self.inner
            .dispatcher
            .publish(topic, qos, retain, payload.as_ref(), mode)
    }

    /// Start the engine; the CONNECTED event arrives asynchronously
    ///
    /// Must be called from within a tokio runtime when the rumqttc engine is used.
    pub fn connect(&self) -> ClientResult<()> {
        let inner = &self.inner;

        if let Err(config_error) = inner.config.server_uri() {
            error!("MQTT server URI is not set, cannot connect");
            return Err(config_error.into());
        }

        let engine = inner
            .dispatcher
            .engine_or_try_init(|| {
                MqttEngine::new(&inner.client_id, &inner.config)
                    .map(|engine| Arc::new(engine) as Arc<dyn SessionEngine>)
            })
            .map_err(|config_error| {
                error!("Invalid MQTT configuration: {}", config_error);
                ClientError::from(config_error)
            })?;

        inner.dispatcher.mark_connecting();
        if let Err(engine_error) = engine.connect(inner.dispatcher.event_sink()) {
            error!("Failed to start MQTT engine: {}", engine_error);
            inner.dispatcher.mark_stopped();
            return Err(engine_error.into());
        }

        info!(client_id = %inner.client_id, "MQTT client started");
        Ok(())
    }

    /// Graceful disconnect
    ///
    /// When connected, requests the disconnect and waits until the DISCONNECTED event
    /// has been processed; there is no timeout. The engine is stopped afterwards in
    /// every case. If the disconnect request itself fails the wait is skipped.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let dispatcher = &self.inner.dispatcher;
        let Some(engine) = dispatcher.engine().cloned() else {
            warn!("MQTT client not started");
            return Ok(());
        };

        let mut outcome = Ok(());
        if dispatcher.is_connected() {
            info!("Disconnecting MQTT client");
            dispatcher.begin_disconnect();
            match engine.disconnect() {
                Ok(()) => {
                    while !dispatcher.disconnect_processed() {
                        tokio::time::sleep(DISCONNECT_POLL_INTERVAL).await;
                    }
                }
                Err(engine_error) => {
                    warn!("Disconnect request failed: {}", engine_error);
                    outcome = Err(engine_error.into());
                }
            }
        }

        engine.stop();
        dispatcher.mark_stopped();
        info!("MQTT client stopped");
        outcome
    }

    /// Stop the engine immediately, without notifying the broker
    pub fn force_stop(&self) {
        let dispatcher = &self.inner.dispatcher;
        match dispatcher.engine() {
            Some(engine) => {
                engine.stop();
                dispatcher.mark_stopped();
                info!("MQTT client force stopped");
            }
            None => warn!("MQTT client not started"),
        }
    }
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("client_id", &self.inner.client_id)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;

    #[test]
    fn test_generated_client_id() {
        let first = generate_client_id();
        assert!(first.starts_with("mqtt-dispatch-"));
        assert_ne!(first, generate_client_id());

        let client = MqttClient::new(ClientConfig::default());
        assert!(client.client_id().starts_with("mqtt-dispatch-"));
    }

    #[test]
    fn test_configured_client_id_wins() {
        let client = MqttClient::new(ClientConfig::default().with_client_id("device-7"));
        assert_eq!(client.client_id(), "device-7");
    }

    #[test]
    fn test_connect_moves_to_connecting() {
        let engine = Arc::new(MockEngine::new());
        let client = MqttClient::with_engine(ClientConfig::test_config(), engine.clone());

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        client.connect().unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connecting);
        assert!(engine.has_sink());
    }

    #[test]
    fn test_failed_engine_start_resets_state() {
        let engine = Arc::new(MockEngine::new());
        engine.set_failing(true);
        let client = MqttClient::with_engine(ClientConfig::test_config(), engine);

        assert!(matches!(client.connect(), Err(ClientError::Engine(_))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_clones_share_the_session() {
        let engine = Arc::new(MockEngine::new());
        let client = MqttClient::with_engine(ClientConfig::test_config(), engine.clone());
        let clone = client.clone();

        clone.connect().unwrap();
        engine.emit(crate::transport::EngineEvent::Connected {
            session_present: false,
        });
        assert!(client.connected());
    }
}
