//! Configuration system for the middleware
//!
//! Loaded from a TOML file. Every section is optional; missing values fall
//! back to the defaults below so that a minimal deployment only has to name
//! the endpoints file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main middleware configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub scheduled: ScheduledSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub acknowledgement: AcknowledgementSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// PEM file used to verify the platform broker
    pub ca_file: Option<PathBuf>,
    /// Keep alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long to wait for the ConnAck of a freshly created client
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default)]
    pub clean_session: bool,
    /// Capacity of the inbound message channel shared by all clients
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            ca_file: None,
            keep_alive_secs: default_keep_alive(),
            connection_timeout_secs: default_connection_timeout(),
            clean_session: false,
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    120
}

fn default_inbound_buffer() -> usize {
    256
}

/// Cron expressions (seconds first) for every scheduled job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledSection {
    #[serde(default = "default_connection_check")]
    pub connection_check: String,
    #[serde(default = "default_status_logging")]
    pub status_logging: String,
    #[serde(default = "default_recipient_query")]
    pub recipient_query: String,
    #[serde(default = "default_fetching_existing_messages")]
    pub fetching_and_confirming_existing_messages: String,
    #[serde(default = "default_empty_message_cache")]
    pub empty_message_cache: String,
    #[serde(default = "default_ack_removal")]
    pub message_waiting_for_ack_removal: String,
}

impl Default for ScheduledSection {
    fn default() -> Self {
        Self {
            connection_check: default_connection_check(),
            status_logging: default_status_logging(),
            recipient_query: default_recipient_query(),
            fetching_and_confirming_existing_messages: default_fetching_existing_messages(),
            empty_message_cache: default_empty_message_cache(),
            message_waiting_for_ack_removal: default_ack_removal(),
        }
    }
}

fn default_connection_check() -> String {
    "0 */5 * * * *".to_string()
}

fn default_status_logging() -> String {
    "0 0 * * * *".to_string()
}

fn default_recipient_query() -> String {
    "0 30 * * * *".to_string()
}

fn default_fetching_existing_messages() -> String {
    "0 15 */6 * * *".to_string()
}

fn default_empty_message_cache() -> String {
    "30 * * * * *".to_string()
}

fn default_ack_removal() -> String {
    "0 0 3 * * *".to_string()
}

impl ScheduledSection {
    /// All expressions with the key they were configured under
    pub fn expressions(&self) -> [(&'static str, &str); 6] {
        [
            ("connection_check", &self.connection_check),
            ("status_logging", &self.status_logging),
            ("recipient_query", &self.recipient_query),
            (
                "fetching_and_confirming_existing_messages",
                &self.fetching_and_confirming_existing_messages,
            ),
            ("empty_message_cache", &self.empty_message_cache),
            (
                "message_waiting_for_ack_removal",
                &self.message_waiting_for_ack_removal,
            ),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, expression) in self.expressions() {
            validate_cron_expression(key, expression)?;
        }
        Ok(())
    }
}

/// Message cache backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Transient,
    Persistent,
}

/// Message cache section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Time to live of a cache entry in seconds, 0 disables expiry
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Capacity of the re-send channel
    #[serde(default = "default_resend_buffer")]
    pub resend_buffer: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Transient,
            ttl_secs: default_cache_ttl(),
            resend_buffer: default_resend_buffer(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_resend_buffer() -> usize {
    1024
}

/// Acknowledgement store section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcknowledgementSection {
    /// Entries older than this are swept (default: one week)
    #[serde(default = "default_sweep_window")]
    pub sweep_window_secs: u64,
}

impl Default for AcknowledgementSection {
    fn default() -> Self {
        Self {
            sweep_window_secs: default_sweep_window(),
        }
    }
}

fn default_sweep_window() -> u64 {
    60 * 60 * 24 * 7
}

impl AcknowledgementSection {
    pub fn sweep_window(&self) -> Duration {
        Duration::from_secs(self.sweep_window_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistenceSection {
    /// JSON file holding the known endpoints
    pub endpoints_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            port: default_health_port(),
        }
    }
}

fn default_health_port() -> u16 {
    8080
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid cron expression for '{key}': {expression}")]
    InvalidCron { key: String, expression: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MiddlewareConfig {
    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MiddlewareConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduled.validate()?;

        if self.acknowledgement.sweep_window_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "acknowledgement.sweep_window_secs must be greater than 0".to_string(),
            ));
        }
        if self.cache.resend_buffer == 0 {
            return Err(ConfigError::InvalidConfig(
                "cache.resend_buffer must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.inbound_buffer == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.inbound_buffer must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Structural check only, the scheduler parses the fields themselves
fn validate_cron_expression(key: &str, expression: &str) -> Result<(), ConfigError> {
    let fields = expression.split_whitespace().count();
    if fields == 6 || fields == 7 {
        Ok(())
    } else {
        Err(ConfigError::InvalidCron {
            key: key.to_string(),
            expression: expression.to_string(),
        })
    }
}
