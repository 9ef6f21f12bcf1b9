//! Thread-safe session metrics
//!
//! Atomic counters for the event dispatcher plus a bounded, mutex-protected window of
//! message dispatch times. Every client owns its own [`SessionMetrics`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of dispatch durations kept for percentile calculation
const DISPATCH_TIME_WINDOW: usize = 1000;

/// Counters for one client session
#[derive(Debug, Default)]
pub struct SessionMetrics {
    // Event flow
    events_dispatched: AtomicU64,
    fragments_received: AtomicU64,
    messages_delivered: AtomicU64,
    reassembly_violations: AtomicU64,
    callbacks_invoked: AtomicU64,

    // Requests
    /// Every SUBSCRIBE handed to the engine, first-time and reissued after a reconnect
    subscribe_requests: AtomicU64,
    /// Reissued SUBSCRIBEs the engine accepted; a subset of `subscribe_requests`
    resubscriptions: AtomicU64,
    unsubscribe_requests: AtomicU64,
    publishes_submitted: AtomicU64,
    publishes_rejected: AtomicU64,

    // Connection
    connections_established: AtomicU64,
    disconnections: AtomicU64,
    transport_errors: AtomicU64,
    last_connected_at: AtomicU64,

    // in microseconds
    dispatch_times: Mutex<Vec<u64>>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fragment_received(&self) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A complete message went through the registry
    pub fn message_delivered(&self, matched_callbacks: usize, duration: Duration) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
        self.callbacks_invoked
            .fetch_add(matched_callbacks as u64, Ordering::Relaxed);
        self.record_dispatch_time(duration);
    }

    pub fn reassembly_violation(&self) {
        self.reassembly_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callbacks_invoked(&self, count: usize) {
        self.callbacks_invoked
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// One SUBSCRIBE about to be handed to the engine
    pub fn subscribe_requested(&self) {
        self.subscribe_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` reissued SUBSCRIBEs accepted by the engine after a reconnect
    pub fn resubscribed(&self, count: usize) {
        self.resubscriptions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn unsubscribe_requested(&self) {
        self.unsubscribe_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_submitted(&self) {
        self.publishes_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_rejected(&self) {
        self.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.last_connected_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dispatch_time(&self, duration: Duration) {
        if let Ok(mut times) = self.dispatch_times.lock() {
            times.push(duration.as_micros() as u64);

            if times.len() > DISPATCH_TIME_WINDOW {
                times.remove(0);
            }
        }
    }

    /// Average, p50 and p99 of the recorded dispatch times (pure function)
    fn dispatch_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.dispatch_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 99.0),
        )
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.events_dispatched,
            &self.fragments_received,
            &self.messages_delivered,
            &self.reassembly_violations,
            &self.callbacks_invoked,
            &self.subscribe_requests,
            &self.resubscriptions,
            &self.unsubscribe_requests,
            &self.publishes_submitted,
            &self.publishes_rejected,
            &self.connections_established,
            &self.disconnections,
            &self.transport_errors,
            &self.last_connected_at,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.dispatch_times.lock() {
            times.clear();
        }
    }

    /// Get a point-in-time snapshot of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg_dispatch_time_us, dispatch_time_p50_us, dispatch_time_p99_us) =
            self.dispatch_time_statistics();

        MetricsSnapshot {
            events: EventMetrics {
                events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
                fragments_received: self.fragments_received.load(Ordering::Relaxed),
                messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
                reassembly_violations: self.reassembly_violations.load(Ordering::Relaxed),
                callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
                avg_dispatch_time_us,
                dispatch_time_p50_us,
                dispatch_time_p99_us,
            },
            requests: RequestMetrics {
                subscribe_requests: self.subscribe_requests.load(Ordering::Relaxed),
                resubscriptions: self.resubscriptions.load(Ordering::Relaxed),
                unsubscribe_requests: self.unsubscribe_requests.load(Ordering::Relaxed),
                publishes_submitted: self.publishes_submitted.load(Ordering::Relaxed),
                publishes_rejected: self.publishes_rejected.load(Ordering::Relaxed),
            },
            connection: ConnectionMetrics {
                connections_established: self.connections_established.load(Ordering::Relaxed),
                disconnections: self.disconnections.load(Ordering::Relaxed),
                transport_errors: self.transport_errors.load(Ordering::Relaxed),
                last_connected_at: self.last_connected_at.load(Ordering::Relaxed),
            },
            timestamp: current_timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events: EventMetrics,
    pub requests: RequestMetrics,
    pub connection: ConnectionMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMetrics {
    pub events_dispatched: u64,
    pub fragments_received: u64,
    pub messages_delivered: u64,
    pub reassembly_violations: u64,
    pub callbacks_invoked: u64,
    pub avg_dispatch_time_us: f64,
    pub dispatch_time_p50_us: f64,
    pub dispatch_time_p99_us: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    pub subscribe_requests: u64,
    pub resubscriptions: u64,
    pub unsubscribe_requests: u64,
    pub publishes_submitted: u64,
    pub publishes_rejected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connections_established: u64,
    pub disconnections: u64,
    pub transport_errors: u64,
    /// Unix seconds of the last CONNECTED event, 0 if never connected
    pub last_connected_at: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
