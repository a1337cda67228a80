//! Integration tests for configuration loading

use fieldwatch::domain::IncidentType;
use fieldwatch::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[server]
bind_address = "127.0.0.1"
port = 18080

[presence]
staleness_secs = 120
history_retention_secs = 3600
default_radius_m = 250.0

[shift]
grace_minutes = 10
utc_offset_minutes = 420

[alerts]
priority = ["RADIUS_BYPASS_REQUEST", "FAKE_GPS"]
dedup_window_secs = 60

[escalation]
poll_interval_secs = 5
server_url = "http://fieldwatch.internal:8080"

[mqtt]
enabled = true
host = "test-host"
port = 1884
topic_prefix = "site/test"

[audit]
file = "/var/log/fieldwatch/events.jsonl"

[[subjects]]
id = "1001"
name = "Budi"
branch_code = "JKT"
reference_lat = -6.2
reference_lon = 106.8

[[subjects]]
id = "1002"
name = "Sari"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.port(), 18080);
    assert_eq!(config.staleness().num_seconds(), 120);
    assert_eq!(config.history_retention().num_seconds(), 3600);
    assert_eq!(config.shift_grace().num_minutes(), 10);
    assert_eq!(
        config.alert_priority(),
        &[IncidentType::RadiusBypassRequest, IncidentType::FakeGps]
    );
    assert_eq!(config.dedup_window().num_seconds(), 60);
    assert_eq!(config.poll_interval().as_secs(), 5);
    assert_eq!(config.server_url(), "http://fieldwatch.internal:8080");
    assert!(config.mqtt_enabled());
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic_prefix(), "site/test");
    assert_eq!(config.audit_file(), Some("/var/log/fieldwatch/events.jsonl"));

    assert_eq!(config.subjects().len(), 2);
    assert_eq!(config.subjects()[0].radius_m, 250.0);
    assert!(config.subjects()[1].reference.is_none());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.port(), 8080);
    assert_eq!(config.staleness().num_seconds(), 300);
    assert_eq!(config.alert_priority(), &IncidentType::ALL);
    assert!(config.subjects().is_empty());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[server\nport = ").unwrap();
    temp_file.flush().unwrap();
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.site_id(), "dev");
    assert_eq!(config.subjects().len(), 3);
    assert_eq!(config.shift_utc_offset().local_minus_utc(), 7 * 3600);
}
