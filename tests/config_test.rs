//! Integration tests for configuration loading

use shipment_tracker::infra::{Config, CourierEnvironment};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[courier]
environment = "test"
timeout_ms = 4000

[courier.test]
endpoint = "http://localhost:9100"
token = "test-token"
store_code = "JWTEST"

[courier.production]
endpoint = "https://sequel247.example/api"
token = "prod-token"
store_code = "JW01"

[scheduler]
interval_secs = 120
concurrency = 2
run_on_start = false

[http]
port = 18080

[store]
path = "/tmp/tracking_orders"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.courier_environment(), CourierEnvironment::Test);
    assert_eq!(config.courier().endpoint, "http://localhost:9100");
    assert_eq!(config.courier().store_code, "JWTEST");
    assert_eq!(config.courier_timeout(), Duration::from_millis(4000));
    assert_eq!(config.poll_interval(), Duration::from_secs(120));
    assert_eq!(config.poll_concurrency(), 2);
    assert!(!config.run_on_start());
    assert_eq!(config.http_port(), 18080);
    assert_eq!(config.store_path(), "/tmp/tracking_orders");
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/path/config.toml");

    assert_eq!(config.config_file(), "default");
    assert_eq!(config.courier_environment(), CourierEnvironment::Test);
    assert_eq!(config.poll_interval(), Duration::from_secs(1800));
    assert_eq!(config.http_port(), 8080);
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[courier\nenvironment = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
    let config = Config::load_from_path(&temp_file.path().display().to_string());
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_zero_interval_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[courier]
environment = "test"

[courier.test]
endpoint = "http://localhost:9100"
token = "t"
store_code = "S"

[scheduler]
interval_secs = 0
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("interval_secs"));
}

#[test]
fn test_builder_overrides() {
    let config = Config::default()
        .with_poll_interval_secs(0)
        .with_poll_concurrency(16)
        .with_courier_endpoint("http://127.0.0.1:19100");

    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.poll_concurrency(), 16);
    assert_eq!(config.courier().endpoint, "http://127.0.0.1:19100");
}
