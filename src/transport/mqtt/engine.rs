//! Impure I/O operations for the rumqttc engine
//!
//! The engine owns a rumqttc `AsyncClient`/`EventLoop` pair. Polling the event loop happens
//! on a single spawned tokio task, which is the event-processing context of the session
//! layer: every [`EngineEvent`] is handed to the sink from that task, one at a time.

use super::connection::{configure_mqtt_options, ReconnectConfig};
use super::health_monitor::{HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::{ClientConfig, ConfigError};
use crate::mqtt_span;
use crate::protocol::{MessageId, PublishMode, QoS};
use crate::transport::{EngineError, EngineEvent, EventSink, SessionEngine};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Production engine driving a broker connection with rumqttc
pub struct RumqttcEngine {
    client_id: String,
    options: MqttOptions,
    reconnect_config: ReconnectConfig,
    auto_reconnect: bool,
    request_capacity: usize,
    client: Mutex<Option<AsyncClient>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    connected: Arc<AtomicBool>,
}

impl RumqttcEngine {
    pub fn new(client_id: &str, config: &ClientConfig) -> Result<Self, ConfigError> {
        let options = configure_mqtt_options(client_id, config)?;

        Ok(Self {
            client_id: client_id.to_string(),
            options,
            reconnect_config: config.reconnect.clone().into(),
            auto_reconnect: config.mqtt.auto_reconnect,
            request_capacity: config.mqtt.request_capacity,
            client: Mutex::new(None),
            event_loop_handle: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Handle for submitting requests to the running event loop
    fn client(&self) -> Result<AsyncClient, EngineError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EngineError::NotStarted)
    }

    fn rejected(error: rumqttc::ClientError) -> EngineError {
        EngineError::RequestRejected(Box::new(error))
    }
}

impl SessionEngine for RumqttcEngine {
    fn connect(&self, sink: EventSink) -> Result<(), EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut handle_slot = self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle_slot
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return Err(EngineError::AlreadyRunning);
        }

        let (client, event_loop) = AsyncClient::new(self.options.clone(), self.request_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
        *self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);

        let task = EventLoopTask {
            event_loop,
            sink,
            shutdown_rx,
            connected: self.connected.clone(),
            reconnect_config: self.reconnect_config.clone(),
            auto_reconnect: self.auto_reconnect,
        };
        let span = mqtt_span!(client_id = %self.client_id);
        *handle_slot = Some(runtime.spawn(task.run().instrument(span)));

        info!(client_id = %self.client_id, "MQTT engine started");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), EngineError> {
        self.client()?.try_disconnect().map_err(Self::rejected)
    }

    fn stop(&self) {
        if let Some(shutdown_tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.connected.store(false, Ordering::SeqCst);
        debug!(client_id = %self.client_id, "MQTT engine stopped");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<Option<MessageId>, EngineError> {
        self.client()?
            .try_subscribe(filter, qos.into())
            .map_err(Self::rejected)?;
        Ok(None)
    }

    fn unsubscribe(&self, filter: &str) -> Result<Option<MessageId>, EngineError> {
        self.client()?
            .try_unsubscribe(filter)
            .map_err(Self::rejected)?;
        Ok(None)
    }

    /// Both modes go through the request queue: the rumqttc event loop owns the socket
    /// and writes queued publishes as soon as it is polled.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
        mode: PublishMode,
    ) -> Result<Option<MessageId>, EngineError> {
        debug!(target: "mqtt_transport", ?mode, "Submitting publish to {}", topic);
        self.client()?
            .try_publish(topic, qos.into(), retain, payload.to_vec())
            .map_err(Self::rejected)?;
        Ok(None)
    }
}

impl Drop for RumqttcEngine {
    fn drop(&mut self) {
        // Background task must not outlive the engine
        self.stop();
    }
}

/// State owned by the spawned event loop task
struct EventLoopTask {
    event_loop: EventLoop,
    sink: EventSink,
    shutdown_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
    reconnect_config: ReconnectConfig,
    auto_reconnect: bool,
}

impl EventLoopTask {
    async fn run(mut self) {
        info!("Starting MQTT event loop");
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                polled = self.event_loop.poll() => {
                    let keep_running = match polled {
                        Ok(event) => self.handle_event(&event, &mut reconnect_attempts),
                        Err(error) => self.handle_error(error, &mut reconnect_attempts).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("MQTT event loop stopped");
    }

    /// Returns false once the connection was closed on our request
    fn handle_event(&mut self, event: &Event, reconnect_attempts: &mut u32) -> bool {
        match MessageHandler::route_mqtt_event(event) {
            EventRoute::Deliver(engine_event) => {
                match &engine_event {
                    EngineEvent::Connected { .. } => {
                        self.connected.store(true, Ordering::SeqCst);
                        *reconnect_attempts = 0;
                    }
                    EngineEvent::Disconnected { .. } => {
                        self.connected.store(false, Ordering::SeqCst);
                    }
                    _ => {}
                }
                (self.sink)(engine_event);
                true
            }
            EventRoute::LocalDisconnect => {
                self.connected.store(false, Ordering::SeqCst);
                (self.sink)(EngineEvent::Disconnected {
                    session_present: false,
                });
                false
            }
            EventRoute::Ignored(description) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", description);
                true
            }
        }
    }

    /// Report the failure, then decide whether to keep polling (rumqttc reconnects on the
    /// next poll)
    async fn handle_error(&mut self, error: ConnectionError, reconnect_attempts: &mut u32) -> bool {
        if matches!(error, ConnectionError::RequestsDone) {
            info!("All request handles dropped, stopping event loop");
            return false;
        }

        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        error!("MQTT event loop error: {}", error);
        (self.sink)(EngineEvent::Error(
            MessageHandler::classify_connection_error(&error),
        ));
        if was_connected {
            (self.sink)(EngineEvent::Disconnected {
                session_present: false,
            });
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &self.reconnect_config,
            self.auto_reconnect,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                let max_display = self
                    .reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );
                self.interruptible_sleep(delay_ms).await
            }
            ReconnectionDecision::AbortDisabled => {
                info!("Automatic reconnection disabled, stopping event loop");
                false
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                warn!(
                    "Max reconnection attempts ({:?}) exceeded, giving up",
                    self.reconnect_config.max_attempts
                );
                false
            }
        }
    }

    /// Returns true if the sleep completed, false if shutdown was requested
    async fn interruptible_sleep(&mut self, delay_ms: u64) -> bool {
        tokio::select! {
            changed = self.shutdown_rx.changed() => {
                if changed.is_err() || *self.shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}
