//! Observability for the session layer
//!
//! Structured logging setup and per-session metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{MetricsSnapshot, SessionMetrics};

// Span macros for structured logging
pub use logging::{dispatch_span, mqtt_span};
