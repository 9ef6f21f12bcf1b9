//! Pure connection configuration for the rumqttc engine
//!
//! This module turns a [`ClientConfig`] into rumqttc options and holds the reconnection
//! backoff settings. Nothing here performs I/O except reading TLS files.

use crate::config::{ClientConfig, ReconnectSection, TlsSection};
use crate::config::ConfigError;
use rumqttc::{LastWill, MqttOptions, TlsConfiguration, Transport};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectSection::default().into()
    }
}

impl From<ReconnectSection> for ReconnectConfig {
    fn from(section: ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms,
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for a 1-based attempt number
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Broker endpoint extracted from the server URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// MQTT over WebSocket (`ws://`, `wss://`)
    pub websocket: bool,
    /// HTTP path of the WebSocket endpoint, e.g. `/mqtt`; empty for TCP
    pub path: String,
}

impl BrokerEndpoint {
    /// Address handed to rumqttc: the host for TCP, the full URL for WebSocket
    pub fn broker_address(&self) -> String {
        if self.websocket {
            let scheme = if self.tls { "wss" } else { "ws" };
            format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
        } else {
            self.host.clone()
        }
    }
}

/// Parse `mqtt://`, `tcp://`, `mqtts://`, `ssl://`, `ws://` or `wss://` URIs
pub fn parse_server_uri(uri: &str) -> Result<BrokerEndpoint, ConfigError> {
    let url = Url::parse(uri).map_err(|_| ConfigError::InvalidServerUri(uri.to_string()))?;

    let (tls, websocket, default_port) = match url.scheme() {
        "mqtt" | "tcp" => (false, false, 1883),
        "mqtts" | "ssl" => (true, false, 8883),
        "ws" => (false, true, 80),
        "wss" => (true, true, 443),
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ConfigError::InvalidServerUri(uri.to_string()))?;
    let port = url.port().unwrap_or(default_port);

    let path = if websocket {
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    } else {
        String::new()
    };

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
        websocket,
        path,
    })
}

/// Build rumqttc options for `client_id` from the client configuration
pub fn configure_mqtt_options(
    client_id: &str,
    config: &ClientConfig,
) -> Result<MqttOptions, ConfigError> {
    let endpoint = parse_server_uri(config.server_uri()?)?;
    // rumqttc panics on these
    if client_id.is_empty() || client_id.starts_with(' ') {
        return Err(ConfigError::InvalidConfig(format!(
            "invalid client id '{client_id}'"
        )));
    }
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.broker_address(), endpoint.port);

    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    mqtt_options.set_clean_session(config.mqtt.clean_session);
    mqtt_options.set_max_packet_size(config.mqtt.max_packet_size, config.mqtt.max_packet_size);

    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    if let Some(will) = &config.will {
        let last_will = LastWill::new(
            &will.topic,
            will.payload.as_bytes().to_vec(),
            will.qos.into(),
            will.retain,
        );
        mqtt_options.set_last_will(last_will);
    }

    match (endpoint.websocket, endpoint.tls) {
        (false, false) => {}
        (false, true) => {
            let tls_config = build_tls_config(config.tls.as_ref())?;
            mqtt_options.set_transport(Transport::tls_with_config(tls_config));
        }
        (true, false) => {
            mqtt_options.set_transport(Transport::Ws);
        }
        (true, true) => {
            let tls_config = build_tls_config(config.tls.as_ref())?;
            mqtt_options.set_transport(Transport::wss_with_config(tls_config));
        }
    }

    Ok(mqtt_options)
}

/// TLS settings from the configured PEM files, or the platform roots when none are given
fn build_tls_config(tls: Option<&TlsSection>) -> Result<TlsConfiguration, ConfigError> {
    let Some(ca_path) = tls.and_then(|tls| tls.ca_cert_path.as_ref()) else {
        return Ok(TlsConfiguration::default());
    };

    let ca = read_pem(ca_path)?;
    let client_auth = match tls.map(|tls| (&tls.client_cert_path, &tls.client_key_path)) {
        Some((Some(cert_path), Some(key_path))) => {
            Some((read_pem(cert_path)?, read_pem(key_path)?))
        }
        _ => None,
    };

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::TlsFile {
        path: path.to_path_buf(),
        source,
    })
}
