//! Client configuration
//!
//! Configuration can be loaded from a TOML file or assembled in code with the `with_*`
//! setters. Every field except the server URI has a default; a missing server URI is only
//! reported when `connect()` is attempted.
//!
//! ```toml
//! [mqtt]
//! server_uri = "mqtts://broker.example.com:8883"
//! client_id = "kitchen-sensor"
//! keep_alive_secs = 60
//! username_env = "MQTT_USER"
//! password_env = "MQTT_PASS"
//!
//! [will]
//! topic = "devices/kitchen/status"
//! qos = 1
//! retain = true
//! payload = "offline"
//!
//! [tls]
//! ca_cert_path = "certs/ca.pem"
//!
//! [reconnect]
//! backoff_ms = [25, 50, 100, 250]
//! sustained_delay_ms = 250
//! ```

use crate::protocol::{validate_topic, QoS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub mqtt: MqttSection,
    /// Last will message, sent by the broker if the connection drops uncleanly
    pub will: Option<WillSection>,
    /// TLS material for `mqtts://` connections
    pub tls: Option<TlsSection>,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Connection options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URI, e.g. `mqtt://localhost:1883`
    pub server_uri: Option<String>,
    /// Client identifier; generated when absent
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    /// Reconnect automatically after the connection drops
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Largest packet accepted or sent, in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Capacity of the engine's request queue
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            server_uri: None,
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: true,
            auto_reconnect: true,
            max_packet_size: default_max_packet_size(),
            request_capacity: default_request_capacity(),
            username: None,
            password: None,
            username_env: None,
            password_env: None,
        }
    }
}

fn default_keep_alive_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_max_packet_size() -> usize {
    256 * 1024
}

fn default_request_capacity() -> usize {
    10
}

/// Last will and testament
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WillSection {
    pub topic: String,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub payload: String,
}

/// TLS certificate locations (PEM)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    /// CA certificate used to verify the broker; system roots are used when absent
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Private key matching `client_cert_path`
    pub client_key_path: Option<PathBuf>,
}

/// Reconnection backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Delays for the first attempts, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    /// Delay once `backoff_ms` is exhausted
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
    /// Give up after this many consecutive failures (unlimited when absent)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
            max_attempts: None,
        }
    }
}

fn default_backoff_ms() -> Vec<u64> {
    vec![25, 50, 100, 250]
}

fn default_sustained_delay_ms() -> u64 {
    250
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("MQTT server URI not set")]
    MissingServerUri,
    #[error("Invalid server URI: {0}")]
    InvalidServerUri(String),
    #[error("Unsupported URI scheme '{0}' (expected mqtt, tcp, mqtts, ssl, ws or wss)")]
    UnsupportedScheme(String),
    #[error("Failed to read TLS file {path}: {source}")]
    TlsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field consistency; the server URI is checked at connect time
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.request_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.request_capacity must be at least 1".to_string(),
            ));
        }

        if let Some(will) = &self.will {
            validate_topic(&will.topic).map_err(|e| {
                ConfigError::InvalidConfig(format!("will.topic is not a valid topic: {e}"))
            })?;
        }

        if let Some(tls) = &self.tls {
            if tls.client_cert_path.is_some() != tls.client_key_path.is_some() {
                return Err(ConfigError::InvalidConfig(
                    "tls.client_cert_path and tls.client_key_path must be set together"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Server URI, or the configuration error reported by `connect()`
    pub fn server_uri(&self) -> Result<&str, ConfigError> {
        self.mqtt
            .server_uri
            .as_deref()
            .ok_or(ConfigError::MissingServerUri)
    }

    /// Resolve credentials: explicit values win over environment variables
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self
            .mqtt
            .username
            .clone()
            .or_else(|| Self::get_env_var_optional(self.mqtt.username_env.as_ref()))?;
        let password = self
            .mqtt
            .password
            .clone()
            .or_else(|| Self::get_env_var_optional(self.mqtt.password_env.as_ref()))
            .unwrap_or_default();
        Some((username, password))
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    pub fn with_server(mut self, uri: impl Into<String>) -> Self {
        self.mqtt.server_uri = Some(uri.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.mqtt.client_id = Some(client_id.into());
        self
    }

    pub fn with_keep_alive(mut self, secs: u64) -> Self {
        self.mqtt.keep_alive_secs = secs;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.mqtt.clean_session = clean_session;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.mqtt.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.mqtt.username = Some(username.into());
        self.mqtt.password = password;
        self
    }

    pub fn with_will(
        mut self,
        topic: impl Into<String>,
        qos: QoS,
        retain: bool,
        payload: impl Into<String>,
    ) -> Self {
        self.will = Some(WillSection {
            topic: topic.into(),
            qos,
            retain,
            payload: payload.into(),
        });
        self
    }

    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.get_or_insert_with(TlsSection::default).ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_certificate(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        let tls = self.tls.get_or_insert_with(TlsSection::default);
        tls.client_cert_path = Some(cert_path.into());
        tls.client_key_path = Some(key_path.into());
        self
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
server_uri = "mqtt://localhost:1883"
client_id = "test-client"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.mqtt.server_uri, None);
        assert_eq!(config.mqtt.keep_alive_secs, 120);
        assert!(config.mqtt.clean_session);
        assert!(config.mqtt.auto_reconnect);
        assert_eq!(config.mqtt.max_packet_size, 256 * 1024);
        assert_eq!(config.reconnect.backoff_ms, vec![25, 50, 100, 250]);
        assert!(config.will.is_none());
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_minimal_toml_gets_defaults() {
        let config = ClientConfig::test_config();
        assert_eq!(config.server_uri().unwrap(), "mqtt://localhost:1883");
        assert_eq!(config.mqtt.client_id.as_deref(), Some("test-client"));
        assert_eq!(config.mqtt.keep_alive_secs, 120);
        assert_eq!(config.reconnect, ReconnectSection::default());
    }

    #[test]
    fn test_missing_server_uri_reported_lazily() {
        let config = ClientConfig::from_toml_str("[mqtt]\nclient_id = \"x\"\n").unwrap();
        assert!(matches!(
            config.server_uri(),
            Err(ConfigError::MissingServerUri)
        ));
    }

    #[test]
    fn test_builder_setters() {
        let config = ClientConfig::default()
            .with_server("mqtts://broker:8883")
            .with_client_id("device-7")
            .with_keep_alive(30)
            .with_clean_session(false)
            .with_auto_reconnect(false)
            .with_credentials("user", Some("secret".to_string()))
            .with_will("devices/7/status", QoS::AtLeastOnce, true, "offline")
            .with_ca_cert_path("ca.pem")
            .with_client_certificate("client.pem", "client.key");

        assert_eq!(config.server_uri().unwrap(), "mqtts://broker:8883");
        assert_eq!(config.mqtt.client_id.as_deref(), Some("device-7"));
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert!(!config.mqtt.clean_session);
        assert!(!config.mqtt.auto_reconnect);
        assert_eq!(
            config.credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
        let will = config.will.as_ref().unwrap();
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        let tls = config.tls.as_ref().unwrap();
        assert_eq!(tls.ca_cert_path, Some(PathBuf::from("ca.pem")));
        assert_eq!(tls.client_key_path, Some(PathBuf::from("client.key")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_from_env() {
        unsafe {
            std::env::set_var("MQTT_DISPATCH_TEST_USER", "env-user");
        }
        let mut config = ClientConfig::default();
        config.mqtt.username_env = Some("MQTT_DISPATCH_TEST_USER".to_string());
        config.mqtt.password_env = Some("MQTT_DISPATCH_TEST_PASS_UNSET".to_string());

        assert_eq!(
            config.credentials(),
            Some(("env-user".to_string(), String::new()))
        );

        unsafe {
            std::env::remove_var("MQTT_DISPATCH_TEST_USER");
        }
        assert_eq!(config.credentials(), None);
    }

    #[test]
    fn test_validation_rejects_wildcard_will_topic() {
        let config =
            ClientConfig::default().with_will("devices/+/status", QoS::AtMostOnce, false, "");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_rejects_half_client_certificate() {
        let mut config = ClientConfig::default();
        config.tls = Some(TlsSection {
            ca_cert_path: None,
            client_cert_path: Some(PathBuf::from("client.pem")),
            client_key_path: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_never_serialized() {
        let config = ClientConfig::default().with_credentials("user", Some("hunter2".to_string()));
        let rendered = toml::to_string(&config).unwrap();
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }
}
