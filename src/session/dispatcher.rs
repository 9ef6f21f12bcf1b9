//! Event dispatcher: routes engine events to registered callbacks
//!
//! The engine calls [`EventDispatcher::dispatch`] from its single event context, one
//! event at a time. User callbacks run inline on that context and must return quickly;
//! a blocking callback stalls keepalive and acknowledgement processing of the engine.
//!
//! No lock is held while a callback runs. Callback lists are cloned out of the registry
//! first, so callbacks may register more listeners, subscribe or publish.

use super::reassembly::{FragmentReassembler, DEFAULT_MAX_MESSAGE_LEN};
use super::registry::{MessageCallback, SubscriptionRegistry};
use super::{lock, ConnectionState};
use crate::dispatch_span;
use crate::error::{ClientError, ClientResult};
use crate::observability::SessionMetrics;
use crate::protocol::{validate_filter, validate_topic, InboundMessage, MessageId, PublishMode, QoS};
use crate::transport::{DataFragment, EngineEvent, EventSink, SessionEngine, TransportError};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct EventDispatcher {
    state: Mutex<ConnectionState>,
    registry: Mutex<SubscriptionRegistry>,
    reassembler: Mutex<FragmentReassembler>,
    engine: OnceCell<Arc<dyn SessionEngine>>,
    disconnect_processed: AtomicBool,
    metrics: Arc<SessionMetrics>,
}

impl EventDispatcher {
    pub fn new(metrics: Arc<SessionMetrics>) -> Self {
        Self::with_max_message_len(metrics, DEFAULT_MAX_MESSAGE_LEN)
    }

    /// Dispatcher whose reassembler refuses fragmented messages above `max_message_len`
    pub fn with_max_message_len(metrics: Arc<SessionMetrics>, max_message_len: usize) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            registry: Mutex::new(SubscriptionRegistry::new()),
            reassembler: Mutex::new(FragmentReassembler::with_max_message_len(max_message_len)),
            engine: OnceCell::new(),
            disconnect_processed: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    pub fn engine(&self) -> Option<&Arc<dyn SessionEngine>> {
        self.engine.get()
    }

    /// Install the engine on first use; later calls return the installed one
    pub fn engine_or_try_init<E>(
        &self,
        init: impl FnOnce() -> Result<Arc<dyn SessionEngine>, E>,
    ) -> Result<&Arc<dyn SessionEngine>, E> {
        self.engine.get_or_try_init(init)
    }

    /// Install `engine`; returns false if one is already installed
    pub fn set_engine(&self, engine: Arc<dyn SessionEngine>) -> bool {
        self.engine.set(engine).is_ok()
    }

    /// Engine handle, but only while the session is connected
    fn connected_engine(&self) -> Option<Arc<dyn SessionEngine>> {
        if self.is_connected() {
            self.engine.get().cloned()
        } else {
            None
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if previous != state {
            debug!("Connection state {} -> {}", previous, state);
        }
    }

    pub fn mark_connecting(&self) {
        self.set_state(ConnectionState::Connecting);
    }

    /// Engine was torn down without a DISCONNECTED event
    pub fn mark_stopped(&self) {
        self.set_state(ConnectionState::Disconnected);
        lock(&self.reassembler).reset();
    }

    /// Arm the flag that [`EventDispatcher::disconnect_processed`] reports
    pub fn begin_disconnect(&self) {
        self.disconnect_processed.store(false, Ordering::SeqCst);
    }

    /// True once a DISCONNECTED event was fully handled since `begin_disconnect`
    pub fn disconnect_processed(&self) -> bool {
        self.disconnect_processed.load(Ordering::SeqCst)
    }

    /// Sink handed to the engine; holds the dispatcher weakly so a dropped client does not
    /// stay alive through its own engine
    pub fn event_sink(self: &Arc<Self>) -> EventSink {
        let dispatcher = Arc::downgrade(self);
        Arc::new(move |event| match dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.dispatch(event),
            None => debug!("Dispatcher dropped, discarding {} event", event.kind()),
        })
    }

    /// Run `f` against the registry under its lock; `f` must not call user code
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut SubscriptionRegistry) -> R) -> R {
        f(&mut lock(&self.registry))
    }

    /// Append a message listener and subscribe right away if connected (best effort)
    pub fn register_filter(&self, filter: Option<String>, qos: QoS, callback: MessageCallback) {
        if let Some(filter) = filter.as_deref() {
            if let Err(error) = validate_filter(filter) {
                warn!("Registering malformed filter '{}': {}", filter, error);
            }
        }

        lock(&self.registry).add_entry(filter.clone(), qos, callback);

        if let (Some(filter), Some(engine)) = (filter, self.connected_engine()) {
            self.metrics.subscribe_requested();
            match engine.subscribe(&filter, qos) {
                Ok(message_id) => debug!(?message_id, "Subscribed to '{}' (QoS {})", filter, qos),
                Err(error) => warn!("Immediate subscribe to '{}' failed: {}", filter, error),
            }
        }
    }

    pub fn subscribe(&self, filter: &str, qos: QoS) -> ClientResult<Option<MessageId>> {
        let Some(engine) = self.connected_engine() else {
            warn!("Cannot subscribe to '{}': not connected", filter);
            return Err(ClientError::NotConnected);
        };

        self.metrics.subscribe_requested();
        info!("Subscribing to topic {} with QoS {}", filter, qos);
        Ok(engine.subscribe(filter, qos)?)
    }

    pub fn unsubscribe(&self, filter: &str) -> ClientResult<Option<MessageId>> {
        let Some(engine) = self.connected_engine() else {
            warn!("Cannot unsubscribe from '{}': not connected", filter);
            return Err(ClientError::NotConnected);
        };

        self.metrics.unsubscribe_requested();
        info!("Unsubscribing from topic {}", filter);
        Ok(engine.unsubscribe(filter)?)
    }

    /// QoS 0 while disconnected is rejected; QoS 1/2 is handed to the engine to queue
    pub fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
        mode: PublishMode,
    ) -> ClientResult<Option<MessageId>> {
        validate_topic(topic)?;

        if qos == QoS::AtMostOnce && !self.is_connected() {
            warn!("Dropping QoS 0 publish to '{}': not connected", topic);
            self.metrics.publish_rejected();
            return Err(ClientError::NotConnected);
        }

        let Some(engine) = self.engine() else {
            warn!("Dropping publish to '{}': client was never started", topic);
            self.metrics.publish_rejected();
            return Err(ClientError::NotConnected);
        };

        let message_id = engine
            .publish(topic, qos, retain, payload, mode)
            .map_err(|error| {
                warn!("Publish to '{}' failed: {}", topic, error);
                self.metrics.publish_rejected();
                ClientError::from(error)
            })?;

        self.metrics.publish_submitted();
        debug!(?message_id, ?mode, "Published {} bytes to {}", payload.len(), topic);
        Ok(message_id)
    }

    /// Handle one engine event
    pub fn dispatch(&self, event: EngineEvent) {
        let span = dispatch_span!(kind = event.kind());
        let _guard = span.enter();
        self.metrics.event_dispatched();

        match event {
            EngineEvent::Connected { session_present } => self.on_connected(session_present),
            EngineEvent::Disconnected { session_present } => {
                self.on_disconnected(session_present)
            }
            EngineEvent::Subscribed(message_id) => {
                info!("MQTT_EVENT_SUBSCRIBED, msg_id={}", message_id);
                let callbacks = lock(&self.registry).subscribe_callbacks();
                self.invoke_all(&callbacks, message_id);
            }
            EngineEvent::Unsubscribed(message_id) => {
                info!("MQTT_EVENT_UNSUBSCRIBED, msg_id={}", message_id);
                let callbacks = lock(&self.registry).unsubscribe_callbacks();
                self.invoke_all(&callbacks, message_id);
            }
            EngineEvent::Published(message_id) => {
                debug!("MQTT_EVENT_PUBLISHED, msg_id={}", message_id);
                let callbacks = lock(&self.registry).publish_callbacks();
                self.invoke_all(&callbacks, message_id);
            }
            EngineEvent::Data(fragment) => self.on_data(fragment),
            EngineEvent::Error(error) => self.on_error(error),
        }
    }

    fn on_connected(&self, session_present: bool) {
        self.set_state(ConnectionState::Connected);
        self.metrics.connection_established();
        info!(session_present, "Connected to broker");

        // Resubscribe regardless of session_present
        let subscriptions = lock(&self.registry).subscriptions();
        match self.engine() {
            Some(engine) => {
                let mut reissued = 0;
                for (filter, qos) in &subscriptions {
                    self.metrics.subscribe_requested();
                    match engine.subscribe(filter, *qos) {
                        Ok(_) => reissued += 1,
                        Err(error) => warn!("Resubscribe to '{}' failed: {}", filter, error),
                    }
                }
                self.metrics.resubscribed(reissued);
                debug!("Reissued {}/{} subscriptions", reissued, subscriptions.len());
            }
            None if !subscriptions.is_empty() => {
                warn!("No engine installed, {} subscriptions not reissued", subscriptions.len());
            }
            None => {}
        }

        let callbacks = lock(&self.registry).connect_callbacks();
        self.invoke_all(&callbacks, session_present);
    }

    fn on_disconnected(&self, session_present: bool) {
        self.set_state(ConnectionState::Disconnected);
        self.metrics.connection_lost();
        if lock(&self.reassembler).reset() {
            warn!("Connection lost with a fragmented message in progress");
        }
        info!("MQTT_EVENT_DISCONNECTED");

        let callbacks = lock(&self.registry).disconnect_callbacks();
        self.invoke_all(&callbacks, session_present);

        self.disconnect_processed.store(true, Ordering::SeqCst);
    }

    fn on_error(&self, error: TransportError) {
        self.set_state(ConnectionState::Disconnected);
        self.metrics.transport_error();
        lock(&self.reassembler).reset();
        warn!(kind = ?error.kind, "MQTT_EVENT_ERROR: {}", error.message);

        let callbacks = lock(&self.registry).error_callbacks();
        for callback in &callbacks {
            callback(&error);
        }
        self.metrics.callbacks_invoked(callbacks.len());
    }

    fn on_data(&self, fragment: DataFragment) {
        self.metrics.fragment_received();
        let (topic, offset, chunk_len, total_len) = (
            fragment.topic.clone(),
            fragment.offset,
            fragment.chunk_len(),
            fragment.total_len,
        );

        let pushed = lock(&self.reassembler).push(fragment);
        match pushed {
            Ok(Some(message)) => self.deliver(message),
            Ok(None) => debug!(
                "Buffered fragment {}..{} of {} bytes",
                offset,
                offset + chunk_len,
                total_len
            ),
            Err(error) => {
                self.metrics.reassembly_violation();
                warn!(topic = %topic, "Dropping fragment: {}", error);
            }
        }
    }

    /// Invoke every listener matching the message topic, in registration order
    pub fn deliver(&self, message: InboundMessage) {
        let started = Instant::now();
        let callbacks = lock(&self.registry).matching_callbacks(&message.topic);
        debug!(
            "Delivering {} bytes on '{}' to {} listeners",
            message.payload.len(),
            message.topic,
            callbacks.len()
        );

        for callback in &callbacks {
            callback(&message);
        }
        self.metrics
            .message_delivered(callbacks.len(), started.elapsed());
    }

    fn invoke_all<T: Copy>(&self, callbacks: &[Arc<dyn Fn(T) + Send + Sync>], value: T) {
        for callback in callbacks {
            callback(value);
        }
        self.metrics.callbacks_invoked(callbacks.len());
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("state", &self.state())
            .field("entries", &lock(&self.registry).entries().len())
            .field("engine_installed", &self.engine.get().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ReassemblyError;
    use crate::testing::{EngineCall, MockEngine};
    use crate::transport::TransportErrorKind;
    use bytes::Bytes;

    fn dispatcher_with_engine() -> (Arc<EventDispatcher>, Arc<MockEngine>) {
        let dispatcher = Arc::new(EventDispatcher::new(Arc::new(SessionMetrics::new())));
        let engine = Arc::new(MockEngine::new());
        assert!(dispatcher.set_engine(engine.clone()));
        (dispatcher, engine)
    }

    fn ignore() -> MessageCallback {
        Arc::new(|_: &InboundMessage| {})
    }

    fn recorder() -> (Arc<Mutex<Vec<InboundMessage>>>, MessageCallback) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let callback: MessageCallback = Arc::new(move |message: &InboundMessage| {
            sink.lock().unwrap().push(message.clone())
        });
        (received, callback)
    }

    fn fragment(
        topic: &str,
        chunk: &'static [u8],
        total_len: usize,
        offset: usize,
    ) -> DataFragment {
        DataFragment {
            topic: topic.to_string(),
            payload: Bytes::from_static(chunk),
            total_len,
            offset,
            retain: false,
            qos: QoS::AtMostOnce,
            dup: false,
        }
    }

    #[test]
    fn test_every_connect_resubscribes_all_filters() {
        let (dispatcher, engine) = dispatcher_with_engine();
        for filter in ["a/+", "b/#", "c"] {
            dispatcher.register_filter(Some(filter.to_string()), QoS::AtLeastOnce, ignore());
        }
        dispatcher.register_filter(None, QoS::AtMostOnce, ignore());
        assert!(engine.subscriptions().is_empty());

        dispatcher.dispatch(EngineEvent::Connected {
            session_present: false,
        });
        dispatcher.dispatch(EngineEvent::Disconnected {
            session_present: false,
        });
        dispatcher.dispatch(EngineEvent::Connected {
            session_present: true,
        });

        let subscriptions = engine.subscriptions();
        assert_eq!(subscriptions.len(), 6);
        assert_eq!(subscriptions[0], ("a/+".to_string(), QoS::AtLeastOnce));
        assert_eq!(subscriptions[3], ("a/+".to_string(), QoS::AtLeastOnce));
        assert_eq!(dispatcher.metrics().snapshot().requests.resubscriptions, 6);
    }

    #[test]
    fn test_subscribe_counters_cover_both_paths() {
        let (dispatcher, engine) = dispatcher_with_engine();
        dispatcher.register_filter(Some("a/b".to_string()), QoS::AtMostOnce, ignore());

        dispatcher.dispatch(EngineEvent::Connected {
            session_present: false,
        });
        dispatcher.register_filter(Some("c/d".to_string()), QoS::AtMostOnce, ignore());
        dispatcher.subscribe("e/f", QoS::AtMostOnce).unwrap();

        engine.set_failing(true);
        dispatcher.dispatch(EngineEvent::Connected {
            session_present: true,
        });

        let requests = dispatcher.metrics().snapshot().requests;
        // 1 reissue + 1 immediate + 1 explicit, then 2 failed reissues
        assert_eq!(requests.subscribe_requests, 5);
        assert_eq!(requests.resubscriptions, 1);
    }

    #[test]
    fn test_resubscribe_happens_before_connect_callbacks() {
        let (dispatcher, engine) = dispatcher_with_engine();
        dispatcher.register_filter(Some("x/y".to_string()), QoS::AtMostOnce, ignore());

        let seen = Arc::new(Mutex::new(None));
        let (seen_in_callback, engine_in_callback) = (seen.clone(), engine.clone());
        dispatcher.with_registry(|registry| {
            registry.add_connect_callback(Arc::new(move |session_present: bool| {
                *seen_in_callback.lock().unwrap() =
                    Some((session_present, engine_in_callback.subscriptions().len()));
            }))
        });

        dispatcher.dispatch(EngineEvent::Connected {
            session_present: true,
        });
        assert_eq!(*seen.lock().unwrap(), Some((true, 1)));
    }

    #[test]
    fn test_register_while_connected_subscribes_immediately() {
        let (dispatcher, engine) = dispatcher_with_engine();
        dispatcher.dispatch(EngineEvent::Connected {
            session_present: false,
        });

        dispatcher.register_filter(Some("live/+".to_string()), QoS::ExactlyOnce, ignore());
        assert_eq!(
            engine.subscriptions(),
            vec![("live/+".to_string(), QoS::ExactlyOnce)]
        );
    }

    #[test]
    fn test_matching_listeners_fire_in_registration_order() {
        let (dispatcher, _engine) = dispatcher_with_engine();
        let order = Arc::new(Mutex::new(Vec::new()));
        let listeners = [
            ("first", Some("s/+/p")),
            ("global", None),
            ("second", Some("s/#")),
            ("miss", Some("t/#")),
        ];
        for (name, filter) in listeners {
            let order = order.clone();
            dispatcher.register_filter(
                filter.map(str::to_string),
                QoS::AtMostOnce,
                Arc::new(move |_: &InboundMessage| order.lock().unwrap().push(name)),
            );
        }

        dispatcher.dispatch(EngineEvent::Data(DataFragment::complete(
            "s/tennis/p",
            "x",
            QoS::AtMostOnce,
        )));

        assert_eq!(*order.lock().unwrap(), vec!["first", "global", "second"]);
    }

    #[test]
    fn test_fragments_are_reassembled_before_delivery() {
        let (dispatcher, _engine) = dispatcher_with_engine();
        let (received, callback) = recorder();
        dispatcher.register_filter(Some("t".to_string()), QoS::AtMostOnce, callback);

        dispatcher.dispatch(EngineEvent::Data(fragment("t", b"AB", 5, 0)));
        dispatcher.dispatch(EngineEvent::Data(fragment("", b"CD", 5, 2)));
        assert!(received.lock().unwrap().is_empty());
        dispatcher.dispatch(EngineEvent::Data(fragment("", b"E", 5, 4)));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].topic, "t");
        assert_eq!(received[0].payload, Bytes::from_static(b"ABCDE"));

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.events.fragments_received, 3);
        assert_eq!(snapshot.events.messages_delivered, 1);
    }

    #[test]
    fn test_violating_fragment_is_dropped_and_counted() {
        let (dispatcher, _engine) = dispatcher_with_engine();
        let (received, callback) = recorder();
        dispatcher.register_filter(None, QoS::AtMostOnce, callback);

        dispatcher.dispatch(EngineEvent::Data(fragment("t", b"CD", 5, 2)));
        dispatcher.dispatch(EngineEvent::Data(fragment("t", b"ABCDEF", 5, 0)));

        assert!(received.lock().unwrap().is_empty());
        assert_eq!(dispatcher.metrics().snapshot().events.reassembly_violations, 2);
    }

    #[test]
    fn test_oversized_fragmented_message_is_dropped_and_counted() {
        let metrics = Arc::new(SessionMetrics::new());
        let dispatcher = Arc::new(EventDispatcher::with_max_message_len(metrics, 8));
        let (received, callback) = recorder();
        dispatcher.register_filter(None, QoS::AtMostOnce, callback);

        dispatcher.dispatch(EngineEvent::Data(fragment("big", b"AB", usize::MAX / 2, 0)));
        dispatcher.dispatch(EngineEvent::Data(fragment("", b"CD", usize::MAX / 2, 2)));
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(dispatcher.metrics().snapshot().events.reassembly_violations, 2);

        // Messages within the limit still go through
        dispatcher.dispatch(EngineEvent::Data(fragment("t", b"AB", 4, 0)));
        dispatcher.dispatch(EngineEvent::Data(fragment("", b"CD", 4, 2)));
        assert_eq!(received.lock().unwrap().len(), 1);

        assert_eq!(
            FragmentReassembler::with_max_message_len(8).push(fragment("x", b"A", 9, 0)),
            Err(ReassemblyError::TooLarge {
                total_len: 9,
                limit: 8
            })
        );
    }

    #[test]
    fn test_disconnect_discards_partial_message() {
        let (dispatcher, _engine) = dispatcher_with_engine();
        let (received, callback) = recorder();
        dispatcher.register_filter(None, QoS::AtMostOnce, callback);

        dispatcher.dispatch(EngineEvent::Data(fragment("t", b"AB", 5, 0)));
        dispatcher.dispatch(EngineEvent::Disconnected {
            session_present: false,
        });
        dispatcher.dispatch(EngineEvent::Data(fragment("", b"CDE", 5, 2)));

        assert!(received.lock().unwrap().is_empty());
        assert!(dispatcher.disconnect_processed());
    }

    #[test]
    fn test_error_marks_disconnected_and_reaches_callbacks() {
        let (dispatcher, _engine) = dispatcher_with_engine();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        dispatcher.with_registry(|registry| {
            registry.add_error_callback(Arc::new(move |error: &TransportError| {
                sink.lock().unwrap().push(error.clone())
            }))
        });

        dispatcher.dispatch(EngineEvent::Connected {
            session_present: false,
        });
        let error = TransportError::new(TransportErrorKind::Transport, "connection reset");
        dispatcher.dispatch(EngineEvent::Error(error.clone()));

        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);
        assert_eq!(*errors.lock().unwrap(), vec![error]);
    }

    #[test]
    fn test_id_events_are_forwarded_verbatim() {
        let (dispatcher, _engine) = dispatcher_with_engine();
        let ids = Arc::new(Mutex::new(Vec::new()));
        let (sub, unsub, publ) = (ids.clone(), ids.clone(), ids.clone());
        dispatcher.with_registry(|registry| {
            registry.add_subscribe_callback(Arc::new(move |id: MessageId| {
                sub.lock().unwrap().push(("sub", id))
            }));
            registry.add_unsubscribe_callback(Arc::new(move |id: MessageId| {
                unsub.lock().unwrap().push(("unsub", id))
            }));
            registry.add_publish_callback(Arc::new(move |id: MessageId| {
                publ.lock().unwrap().push(("pub", id))
            }));
        });

        dispatcher.dispatch(EngineEvent::Subscribed(7));
        dispatcher.dispatch(EngineEvent::Unsubscribed(8));
        dispatcher.dispatch(EngineEvent::Published(9));

        assert_eq!(
            *ids.lock().unwrap(),
            vec![("sub", 7), ("unsub", 8), ("pub", 9)]
        );
    }

    #[test]
    fn test_callbacks_can_reenter_the_dispatcher() {
        let (dispatcher, engine) = dispatcher_with_engine();
        dispatcher.dispatch(EngineEvent::Connected {
            session_present: false,
        });

        let weak = Arc::downgrade(&dispatcher);
        dispatcher.register_filter(
            Some("cmd/register".to_string()),
            QoS::AtMostOnce,
            Arc::new(move |_: &InboundMessage| {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.register_filter(
                        Some("late/#".to_string()),
                        QoS::AtMostOnce,
                        ignore(),
                    );
                    let _ = dispatcher.publish(
                        "ack",
                        QoS::AtMostOnce,
                        false,
                        b"ok",
                        PublishMode::Enqueue,
                    );
                }
            }),
        );

        dispatcher.dispatch(EngineEvent::Data(DataFragment::complete(
            "cmd/register",
            "",
            QoS::AtMostOnce,
        )));

        assert!(engine
            .subscriptions()
            .contains(&("late/#".to_string(), QoS::AtMostOnce)));
        assert_eq!(engine.published().len(), 1);
    }

    #[test]
    fn test_publish_policy() {
        let (dispatcher, engine) = dispatcher_with_engine();

        let rejected =
            dispatcher.publish("a/b", QoS::AtMostOnce, false, b"x", PublishMode::Enqueue);
        assert!(matches!(rejected, Err(ClientError::NotConnected)));

        let queued =
            dispatcher.publish("a/b", QoS::AtLeastOnce, false, b"x", PublishMode::Enqueue);
        assert!(queued.is_ok());

        assert!(matches!(
            dispatcher.publish("a/+", QoS::AtLeastOnce, false, b"x", PublishMode::Enqueue),
            Err(ClientError::InvalidTopic(_))
        ));

        assert_eq!(engine.published().len(), 1);
        assert_eq!(dispatcher.metrics().snapshot().requests.publishes_rejected, 1);
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let (dispatcher, engine) = dispatcher_with_engine();
        assert!(matches!(
            dispatcher.subscribe("a/b", QoS::AtMostOnce),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            dispatcher.unsubscribe("a/b"),
            Err(ClientError::NotConnected)
        ));
        assert!(engine.calls().is_empty());

        dispatcher.dispatch(EngineEvent::Connected {
            session_present: false,
        });
        assert!(dispatcher.subscribe("a/b", QoS::AtMostOnce).unwrap().is_some());
        assert!(dispatcher.unsubscribe("a/b").unwrap().is_some());
        assert!(matches!(
            engine.calls().last(),
            Some(EngineCall::Unsubscribe { filter }) if filter == "a/b"
        ));
    }

    #[test]
    fn test_sink_does_not_keep_dispatcher_alive() {
        let dispatcher = Arc::new(EventDispatcher::new(Arc::new(SessionMetrics::new())));
        let sink = dispatcher.event_sink();
        let metrics = dispatcher.metrics().clone();

        sink(EngineEvent::Published(1));
        assert_eq!(metrics.snapshot().events.events_dispatched, 1);

        drop(dispatcher);
        sink(EngineEvent::Published(2));
        assert_eq!(metrics.snapshot().events.events_dispatched, 1);
    }
}
