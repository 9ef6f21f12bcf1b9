//! Tests for logging configuration and format parsing
//!
//! Exercises the pure parsing helpers and checks that initialization can be repeated.

use mqtt_dispatch::observability::logging::{parse_level, parse_spans_flag, LogFormat};
use mqtt_dispatch::observability::{init_default_logging, init_logging};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for value in ["", "xml", "yaml", "123", "  json  "] {
        assert_eq!(LogFormat::parse(value), LogFormat::Json, "value {value:?}");
    }
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("Warn"), Level::WARN);
    assert_eq!(parse_level("DEBUG"), Level::DEBUG);
    assert_eq!(parse_level("trace"), Level::TRACE);
    assert_eq!(parse_level("verbose"), Level::INFO);
}

#[test]
fn test_spans_flag_parsing() {
    assert!(parse_spans_flag("true"));
    assert!(parse_spans_flag("TRUE"));
    assert!(!parse_spans_flag("1"));
    assert!(!parse_spans_flag("false"));
}

#[test]
fn test_repeated_initialization_is_harmless() {
    init_logging(Level::DEBUG, LogFormat::Compact, true);
    init_logging(Level::INFO, LogFormat::Json, false);
    init_default_logging();

    let span = mqtt_dispatch::dispatch_span!(kind = "test");
    let _guard = span.enter();
    tracing::info!("logging still works after repeated initialization");
}
