//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! A missing file falls back to defaults. A file that fails to parse or
//! validate is fatal: the engine never starts on a bad configuration.

use crate::domain::types::{DeviceEntry, TimestampSource};
use crate::infra::error::ConfigError;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "dc-01")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "rfid-gateway".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Sweeper period; also the extra grace an exiting tag gets before departing
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Unseen time after which a present tag starts exiting
    #[serde(default = "default_departed_threshold_secs")]
    pub departed_threshold_secs: u64,
    /// Unseen time after which a tag is evicted
    #[serde(default = "default_age_out_hours")]
    pub age_out_hours: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            departed_threshold_secs: default_departed_threshold_secs(),
            age_out_hours: default_age_out_hours(),
        }
    }
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_departed_threshold_secs() -> u64 {
    600
}

fn default_age_out_hours() -> u64 {
    336
}

#[derive(Debug, Clone, Deserialize)]
pub struct MobilityConfig {
    /// Confidence a conflicting read must exceed to move a tag
    #[serde(default = "default_mobility_threshold")]
    pub threshold: f64,
    /// Minimum time between two accepted location changes
    #[serde(default = "default_mobility_holdoff_ms")]
    pub holdoff_ms: u64,
    /// Threshold decay per second spent at the current location
    #[serde(default = "default_mobility_slope")]
    pub slope: f64,
}

impl Default for MobilityConfig {
    fn default() -> Self {
        Self {
            threshold: default_mobility_threshold(),
            holdoff_ms: default_mobility_holdoff_ms(),
            slope: default_mobility_slope(),
        }
    }
}

fn default_mobility_threshold() -> f64 {
    0.6
}

fn default_mobility_holdoff_ms() -> u64 {
    3000
}

fn default_mobility_slope() -> f64 {
    0.001
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub timestamp_source: TimestampSource,
    /// Bounded queue between each MQTT source and its ingest worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { timestamp_source: TimestampSource::default(), channel_capacity: default_channel_capacity() }
    }
}

fn default_channel_capacity() -> usize {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// One read source per topic
    #[serde(default = "default_mqtt_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topics: default_mqtt_topics(),
            username: None,
            password: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topics() -> Vec<String> {
    vec!["rfid/reads/#".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { enabled: false, bind_address: default_broker_bind_address(), port: default_mqtt_port() }
    }
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Query surface port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Device catalog endpoint; the static locations below are used alone if unset
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_catalog_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub locations: Vec<DeviceEntry>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            catalog_url: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            timeout_ms: default_catalog_timeout_ms(),
            locations: Vec::new(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_catalog_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Publish inventory events (arrival, moved, departed, ...)
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Seconds between metrics snapshots on `metrics_topic`
    #[serde(default = "default_egress_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            events_topic: default_events_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_interval_secs: default_egress_metrics_interval_secs(),
        }
    }
}

fn default_events_topic() -> String {
    "rfid/inventory/events".to_string()
}

fn default_metrics_topic() -> String {
    "rfid/inventory/metrics".to_string()
}

fn default_egress_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub mobility: MobilityConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
///
/// Immutable after load; components copy the values they need at construction.
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    check_interval_secs: u64,
    departed_threshold_secs: u64,
    age_out_hours: u64,
    mobility_threshold: f64,
    mobility_holdoff_ms: u64,
    mobility_slope: f64,
    timestamp_source: TimestampSource,
    ingest_channel_capacity: usize,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topics: Vec<String>,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    http_port: u16,
    catalog_url: Option<String>,
    catalog_refresh_interval_secs: u64,
    catalog_timeout_ms: u64,
    directory_locations: Vec<DeviceEntry>,
    metrics_interval_secs: u64,
    mqtt_egress_enabled: bool,
    mqtt_egress_events_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            check_interval_secs: toml_config.lifecycle.check_interval_secs,
            departed_threshold_secs: toml_config.lifecycle.departed_threshold_secs,
            age_out_hours: toml_config.lifecycle.age_out_hours,
            mobility_threshold: toml_config.mobility.threshold,
            mobility_holdoff_ms: toml_config.mobility.holdoff_ms,
            mobility_slope: toml_config.mobility.slope,
            timestamp_source: toml_config.ingest.timestamp_source,
            ingest_channel_capacity: toml_config.ingest.channel_capacity,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topics: toml_config.mqtt.topics,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            http_port: toml_config.http.port,
            catalog_url: toml_config.directory.catalog_url,
            catalog_refresh_interval_secs: toml_config.directory.refresh_interval_secs,
            catalog_timeout_ms: toml_config.directory.timeout_ms,
            directory_locations: toml_config.directory.locations,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_events_topic: toml_config.mqtt_egress.events_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config.mqtt_egress.metrics_interval_secs,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str, config_file: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {config_file}"))?;
        let config = Self::from_toml(toml_config, config_file);
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {config_file}"))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from a path, falling back to defaults only if the file is absent
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(config_file = %path.display(), "config_file_missing_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("lifecycle.check_interval_secs", self.check_interval_secs),
            ("lifecycle.departed_threshold_secs", self.departed_threshold_secs),
            ("lifecycle.age_out_hours", self.age_out_hours),
            ("metrics.interval_secs", self.metrics_interval_secs),
            ("mqtt_egress.metrics_interval_secs", self.mqtt_egress_metrics_interval_secs),
            ("ingest.channel_capacity", self.ingest_channel_capacity as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { field });
            }
        }
        for (field, value, ms_per_unit) in [
            ("lifecycle.check_interval_secs", self.check_interval_secs, 1_000),
            ("lifecycle.departed_threshold_secs", self.departed_threshold_secs, 1_000),
            ("lifecycle.age_out_hours", self.age_out_hours, 3_600_000),
        ] {
            if value.checked_mul(ms_per_unit).is_none() {
                return Err(ConfigError::TooLarge { field });
            }
        }
        if self.catalog_url.is_some() && self.catalog_refresh_interval_secs == 0 {
            return Err(ConfigError::NotPositive { field: "directory.refresh_interval_secs" });
        }

        for (field, value) in
            [("mobility.threshold", self.mobility_threshold), ("mobility.slope", self.mobility_slope)]
        {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidNumber { field, value });
            }
        }

        let departure_secs = self.departed_threshold_secs.saturating_add(self.check_interval_secs);
        let age_out_secs = self.age_out_hours.saturating_mul(3600);
        if age_out_secs <= departure_secs {
            return Err(ConfigError::AgeOutTooShort { age_out_secs, departure_secs });
        }

        if self.mqtt_enabled && self.mqtt_topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }

        let mut seen = HashSet::new();
        for entry in &self.directory_locations {
            if !seen.insert(entry.location_id.as_str()) {
                return Err(ConfigError::DuplicateLocation(entry.location_id.clone()));
            }
        }

        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn check_interval_secs(&self) -> u64 {
        self.check_interval_secs
    }

    pub fn departed_threshold_secs(&self) -> u64 {
        self.departed_threshold_secs
    }

    pub fn age_out_hours(&self) -> u64 {
        self.age_out_hours
    }

    pub fn mobility_threshold(&self) -> f64 {
        self.mobility_threshold
    }

    pub fn mobility_holdoff_ms(&self) -> u64 {
        self.mobility_holdoff_ms
    }

    pub fn mobility_slope(&self) -> f64 {
        self.mobility_slope
    }

    pub fn timestamp_source(&self) -> TimestampSource {
        self.timestamp_source
    }

    pub fn ingest_channel_capacity(&self) -> usize {
        self.ingest_channel_capacity
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topics(&self) -> &[String] {
        &self.mqtt_topics
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn catalog_url(&self) -> Option<&str> {
        self.catalog_url.as_deref()
    }

    pub fn catalog_refresh_interval_secs(&self) -> u64 {
        self.catalog_refresh_interval_secs
    }

    pub fn catalog_timeout_ms(&self) -> u64 {
        self.catalog_timeout_ms
    }

    pub fn directory_locations(&self) -> &[DeviceEntry] {
        &self.directory_locations
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_events_topic(&self) -> &str {
        &self.mqtt_egress_events_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set lifecycle timings
    #[cfg(test)]
    pub fn with_lifecycle(mut self, check_secs: u64, departed_secs: u64, age_out_hours: u64) -> Self {
        self.check_interval_secs = check_secs;
        self.departed_threshold_secs = departed_secs;
        self.age_out_hours = age_out_hours;
        self
    }

    /// Builder method for tests to set the mobility profile
    #[cfg(test)]
    pub fn with_mobility(mut self, threshold: f64, holdoff_ms: u64, slope: f64) -> Self {
        self.mobility_threshold = threshold;
        self.mobility_holdoff_ms = holdoff_ms;
        self.mobility_slope = slope;
        self
    }
}
