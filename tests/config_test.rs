//! Integration tests for configuration loading

use plate_gate::infra::config::{MIN_COOLDOWN_MS, MIN_WINDOW};
use plate_gate::infra::{ActuatorMode, Config, LedgerMode};
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
id = "north-gate"

[mqtt]
host = "test-host"
port = 1884
readings_topic = "lane1/plates"
username = "cam"
password = "secret"

[ledger]
mode = "http"
http_url = "http://ledger.local/bookings"
timeout_ms = 1500

[gate]
mode = "mqtt"
mqtt_topic = "lane1/gate"
cooldown_ms = 5000

[recognition]
per_region = false
window = 3
require_strict_format = true

[metrics]
interval_secs = 15
prometheus_port = 9091

[access_log]
file = "/var/log/plate-gate/access.jsonl"

[mqtt_egress]
enabled = false
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "north-gate");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_readings_topic(), "lane1/plates");
    assert_eq!(config.mqtt_username(), Some("cam"));
    assert_eq!(config.ledger_mode(), &LedgerMode::Http);
    assert_eq!(config.ledger_url(), "http://ledger.local/bookings");
    assert_eq!(config.ledger_timeout_ms(), 1500);
    assert_eq!(config.gate_mode(), &ActuatorMode::Mqtt);
    assert_eq!(config.gate_mqtt_topic(), "lane1/gate");
    assert_eq!(config.cooldown_ms(), 5000);
    assert!(!config.per_region());
    assert_eq!(config.window(), 3);
    assert!(config.require_strict_format());
    assert_eq!(config.prometheus_port(), 9091);
    assert_eq!(config.access_log_file(), "/var/log/plate-gate/access.jsonl");
    assert!(!config.mqtt_egress_enabled());
}

#[test]
fn test_minimal_config_uses_defaults() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "localhost"
port = 1883

[ledger]
mode = "file"

[gate]
mode = "log"
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.site_id(), "parking");
    assert_eq!(config.mqtt_readings_topic(), "parking/plates");
    assert_eq!(config.mqtt_max_consecutive_errors(), 10);
    assert_eq!(config.ledger_file(), "bookings.json");
    assert_eq!(config.cooldown_ms(), MIN_COOLDOWN_MS);
    assert_eq!(config.window(), MIN_WINDOW);
    assert!(config.per_region());
    assert!(!config.require_strict_format());
    assert_eq!(config.region_idle_secs(), 10);
    assert_eq!(config.mqtt_egress_decisions_topic(), "parking/decisions");
    assert!(config.broker_enabled());
}

#[test]
fn test_missing_required_section_is_error() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "localhost"
port = 1883
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_unknown_mode_is_error() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "localhost"
port = 1883

[ledger]
mode = "postgres"

[gate]
mode = "log"
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.gate_mode(), &ActuatorMode::Log);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_dev_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.site_id(), "dev-lot");
    assert_eq!(config.ledger_file(), "config/bookings.json");
}
