//! Mock engine for testing
//!
//! [`MockEngine`] records every request the session layer makes and lets tests inject
//! engine events, either synchronously or after a delay from another thread.

use crate::protocol::{MessageId, PublishMode, QoS};
use crate::transport::{EngineError, EngineEvent, EventSink, SessionEngine};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// One recorded engine request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Connect,
    Disconnect,
    Stop,
    Subscribe {
        filter: String,
        qos: QoS,
    },
    Unsubscribe {
        filter: String,
    },
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
        mode: PublishMode,
    },
}

/// What the mock does when asked to disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectBehavior {
    /// Emit DISCONNECTED before `disconnect()` returns
    Immediate,
    /// Emit DISCONNECTED from a helper thread after the delay
    Deferred(Duration),
    /// Never emit; the test calls [`MockEngine::emit`] itself
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
    pub mode: PublishMode,
}

/// Scriptable engine for tests
pub struct MockEngine {
    sink: Mutex<Option<EventSink>>,
    calls: Mutex<Vec<EngineCall>>,
    connected: AtomicBool,
    should_fail: AtomicBool,
    next_message_id: AtomicU16,
    disconnect_behavior: DisconnectBehavior,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_disconnect_behavior(DisconnectBehavior::Immediate)
    }

    pub fn with_disconnect_behavior(disconnect_behavior: DisconnectBehavior) -> Self {
        Self {
            sink: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            should_fail: AtomicBool::new(false),
            next_message_id: AtomicU16::new(1),
            disconnect_behavior,
        }
    }

    /// Make every subsequent request fail
    pub fn set_failing(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Deliver `event` to the sink on the calling thread
    ///
    /// Returns false when nothing is connected to the mock yet.
    pub fn emit(&self, event: EngineEvent) -> bool {
        match &event {
            EngineEvent::Connected { .. } => self.connected.store(true, Ordering::SeqCst),
            EngineEvent::Disconnected { .. } | EngineEvent::Error(_) => {
                self.connected.store(false, Ordering::SeqCst)
            }
            _ => {}
        }

        // Clone the sink out so callbacks can call back into the mock
        let sink = self.locked_sink().clone();
        match sink {
            Some(sink) => {
                sink(event);
                true
            }
            None => false,
        }
    }

    pub fn has_sink(&self) -> bool {
        self.locked_sink().is_some()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.locked_calls().clone()
    }

    pub fn clear_calls(&self) {
        self.locked_calls().clear();
    }

    /// Every subscribe request, in order
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.locked_calls()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Subscribe { filter, qos } => Some((filter.clone(), *qos)),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.locked_calls()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Publish {
                    topic,
                    qos,
                    retain,
                    payload,
                    mode,
                } => Some(PublishedMessage {
                    topic: topic.clone(),
                    qos: *qos,
                    retain: *retain,
                    payload: payload.clone(),
                    mode: *mode,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, expected: fn(&EngineCall) -> bool) -> usize {
        self.locked_calls().iter().filter(|call| expected(call)).count()
    }

    fn record(&self, call: EngineCall) {
        self.locked_calls().push(call);
    }

    fn request(&self, call: EngineCall) -> Result<Option<MessageId>, EngineError> {
        self.record(call);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EngineError::Other("mock engine failure".to_string()));
        }
        Ok(Some(self.next_message_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn locked_sink(&self) -> MutexGuard<'_, Option<EventSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locked_calls(&self) -> MutexGuard<'_, Vec<EngineCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionEngine for MockEngine {
    fn connect(&self, sink: EventSink) -> Result<(), EngineError> {
        self.record(EngineCall::Connect);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EngineError::Other("mock engine failure".to_string()));
        }
        *self.locked_sink() = Some(sink);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Disconnect);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EngineError::Other("mock engine failure".to_string()));
        }

        let event = EngineEvent::Disconnected {
            session_present: false,
        };
        match self.disconnect_behavior {
            DisconnectBehavior::Immediate => {
                self.emit(event);
            }
            DisconnectBehavior::Deferred(delay) => {
                self.connected.store(false, Ordering::SeqCst);
                let sink = self.locked_sink().clone();
                if let Some(sink) = sink {
                    thread::spawn(move || {
                        thread::sleep(delay);
                        sink(event);
                    });
                }
            }
            DisconnectBehavior::Manual => {}
        }
        Ok(())
    }

    fn stop(&self) {
        self.record(EngineCall::Stop);
        self.connected.store(false, Ordering::SeqCst);
        self.locked_sink().take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<Option<MessageId>, EngineError> {
        self.request(EngineCall::Subscribe {
            filter: filter.to_string(),
            qos,
        })
    }

    fn unsubscribe(&self, filter: &str) -> Result<Option<MessageId>, EngineError> {
        self.request(EngineCall::Unsubscribe {
            filter: filter.to_string(),
        })
    }

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
        mode: PublishMode,
    ) -> Result<Option<MessageId>, EngineError> {
        self.request(EngineCall::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.to_vec(),
            mode,
        })
    }
}
