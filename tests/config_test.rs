//! Integration tests for configuration loading

use rfid_inventory::domain::{LocationKind, TimestampSource};
use rfid_inventory::infra::{Config, ConfigError};
use rfid_inventory::services::{LifecyclePolicy, MobilityProfile};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "dc-01"

[lifecycle]
check_interval_secs = 30
departed_threshold_secs = 120
age_out_hours = 24

[mobility]
threshold = 0.7
holdoff_ms = 5000
slope = 0.002

[ingest]
timestamp_source = "gateway"
channel_capacity = 512

[mqtt]
host = "test-host"
port = 1884
topics = ["rfid/reads/dock", "rfid/reads/floor"]

[http]
port = 9090

[directory]
catalog_url = "http://catalog.local/devices"
refresh_interval_secs = 60

[[directory.locations]]
location_id = "RSP-150000-0"
facility_id = "Front"
kind = "exit"

[metrics]
interval_secs = 15

[mqtt_egress]
enabled = true
events_topic = "dc-01/inventory/events"
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "dc-01");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topics().len(), 2);
    assert_eq!(config.timestamp_source(), TimestampSource::Gateway);
    assert_eq!(config.ingest_channel_capacity(), 512);
    assert_eq!(config.http_port(), 9090);
    assert_eq!(config.catalog_url(), Some("http://catalog.local/devices"));
    assert_eq!(config.directory_locations()[0].kind, LocationKind::Exit);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert!(config.mqtt_egress_enabled());
    assert_eq!(config.mqtt_egress_events_topic(), "dc-01/inventory/events");
    assert_eq!(config.mqtt_egress_metrics_topic(), "rfid/inventory/metrics");

    let policy = LifecyclePolicy::from_config(&config);
    assert_eq!(policy.check_interval_ms, 30_000);
    assert_eq!(policy.departed_threshold_ms, 120_000);
    assert_eq!(policy.age_out_ms, 24 * 3_600_000);

    let profile = MobilityProfile::from_config(&config);
    assert_eq!(profile.threshold, 0.7);
    assert_eq!(profile.holdoff_ms, 5000);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_invalid_file_is_fatal() {
    let temp_file = write_config("[lifecycle]\ncheck_interval_secs = 0\n");
    let err = Config::load_from_path(temp_file.path()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::NotPositive { field: "lifecycle.check_interval_secs" })
    );
}

#[test]
fn test_unparseable_file_is_fatal() {
    let temp_file = write_config("[mobility\nthreshold = ");
    assert!(Config::load_from_path(temp_file.path()).is_err());
}

#[test]
fn test_nan_threshold_rejected() {
    let temp_file = write_config("[mobility]\nthreshold = nan\n");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidNumber { field: "mobility.threshold", .. })
    ));
}

#[test]
fn test_age_out_beyond_millisecond_range_rejected() {
    let temp_file = write_config("[lifecycle]\nage_out_hours = 10000000000000\n");
    let err = Config::load_from_path(temp_file.path()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::TooLarge { field: "lifecycle.age_out_hours" })
    );
}
