//! Structured logging system using tracing crate
//!
//! Provides contextual, machine-readable logging with span macros for the engine task and
//! the dispatcher.
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for production and log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation for development
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! # Production JSON logging
//! LOG_FORMAT=json LOG_LEVEL=INFO mqtt-dispatch listen -f 'sensors/#'
//!
//! # Watch every dispatched event
//! LOG_FORMAT=compact LOG_LEVEL=DEBUG mqtt-dispatch listen -f 'sensors/#'
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a `LOG_LEVEL` value, falling back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Parse a `LOG_SPANS` value; only "true" (any case) enables span events
pub fn parse_spans_flag(s: &str) -> bool {
    s.to_lowercase() == "true"
}

/// Filter for `level` with dependency noise reduced
fn build_filter(level: Level) -> EnvFilter {
    // Allow RUST_LOG to override
    if let Ok(rust_log) = env::var("RUST_LOG") {
        if let Ok(filter) = EnvFilter::try_new(rust_log) {
            return filter;
        }
    }

    EnvFilter::try_new(format!("{level},rumqttc=warn,tokio=warn"))
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Initialize logging with manual configuration
///
/// A second initialization in the same process is ignored.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).try_init()
        }
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans =
        parse_spans_flag(&env::var("LOG_SPANS").unwrap_or_else(|_| "false".to_string()));

    init_logging(level, format, include_spans);
}

/// Create an MQTT engine span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_engine", $($field)*)
    };
}

/// Create an event dispatch span
#[macro_export]
macro_rules! dispatch_span {
    ($($field:tt)*) => {
        tracing::debug_span!("event_dispatch", $($field)*)
    };
}

pub use {dispatch_span, mqtt_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("CoMpAcT"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_json() {
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
    }

    #[test]
    fn test_parse_level() {
        let test_cases = vec![
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("DEBUG", Level::DEBUG),
            ("trace", Level::TRACE),
            ("invalid", Level::INFO),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_parse_spans_flag() {
        let test_cases = vec![
            ("true", true),
            ("TRUE", true),
            ("false", false),
            ("", false),
            ("yes", false),
            ("1", false),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_spans_flag(input), expected, "Failed for input: '{input}'");
        }
    }

    #[test]
    fn test_repeated_init_does_not_panic() {
        init_logging(Level::DEBUG, LogFormat::Compact, false);
        init_logging(Level::INFO, LogFormat::Json, true);
    }
}
