//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! The courier token may additionally be supplied through `SEQUEL247_TOKEN`.
//! Both environment variables are read once here and nowhere else.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the courier token of the selected environment
pub const TOKEN_ENV_VAR: &str = "SEQUEL247_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourierEnvironment {
    Test,
    Production,
}

impl CourierEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierEnvironment::Test => "test",
            CourierEnvironment::Production => "production",
        }
    }
}

/// Credentials and endpoint for one courier environment
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CourierEndpoint {
    pub endpoint: String,
    pub token: String,
    pub store_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CourierConfig {
    pub environment: CourierEnvironment,
    #[serde(default = "default_courier_timeout_ms")]
    pub timeout_ms: u64,
    pub test: Option<CourierEndpoint>,
    pub production: Option<CourierEndpoint>,
}

fn default_courier_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum in-flight courier requests per cycle
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

fn default_interval_secs() -> u64 {
    30 * 60
}

fn default_concurrency() -> usize {
    4
}

fn default_run_on_start() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            concurrency: default_concurrency(),
            run_on_start: default_run_on_start(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// HTTP API port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// RocksDB directory holding the tracking documents
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/tracking_orders".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub courier: CourierConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Main configuration struct, loaded once and passed explicitly
#[derive(Debug, Clone)]
pub struct Config {
    courier_environment: CourierEnvironment,
    courier: CourierEndpoint,
    courier_timeout_ms: u64,
    poll_interval_secs: u64,
    poll_concurrency: usize,
    run_on_start: bool,
    http_port: u16,
    store_path: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            courier_environment: CourierEnvironment::Test,
            courier: CourierEndpoint {
                endpoint: "http://localhost:9100".to_string(),
                token: String::new(),
                store_code: "STORE".to_string(),
            },
            courier_timeout_ms: default_courier_timeout_ms(),
            poll_interval_secs: default_interval_secs(),
            poll_concurrency: default_concurrency(),
            run_on_start: default_run_on_start(),
            http_port: default_http_port(),
            store_path: default_store_path(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
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

    /// Parse configuration from TOML text
    ///
    /// `token_override` replaces the token of the selected courier environment.
    pub fn from_toml_str(
        content: &str,
        source: &str,
        token_override: Option<String>,
    ) -> anyhow::Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(content).with_context(|| format!("Failed to parse config {source}"))?;

        let environment = toml_config.courier.environment;
        let selected = match environment {
            CourierEnvironment::Test => toml_config.courier.test,
            CourierEnvironment::Production => toml_config.courier.production,
        };
        let mut courier = selected.with_context(|| {
            format!(
                "Config {source} selects courier environment '{}' but has no [courier.{}] section",
                environment.as_str(),
                environment.as_str()
            )
        })?;

        if let Some(token) = token_override.filter(|t| !t.is_empty()) {
            courier.token = token;
        }

        anyhow::ensure!(
            !courier.endpoint.trim().is_empty(),
            "Config {source}: courier endpoint must not be empty"
        );
        anyhow::ensure!(
            toml_config.scheduler.interval_secs > 0,
            "Config {source}: scheduler.interval_secs must be positive"
        );

        Ok(Self {
            courier_environment: environment,
            courier,
            courier_timeout_ms: toml_config.courier.timeout_ms,
            poll_interval_secs: toml_config.scheduler.interval_secs,
            poll_concurrency: toml_config.scheduler.concurrency.max(1),
            run_on_start: toml_config.scheduler.run_on_start,
            http_port: toml_config.http.port,
            store_path: toml_config.store.path,
            config_file: source.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string(), env::var(TOKEN_ENV_VAR).ok())
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                let mut config = Self::default();
                if let Some(token) = env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()) {
                    config.courier.token = token;
                }
                config
            }
        }
    }

    pub fn courier_environment(&self) -> CourierEnvironment {
        self.courier_environment
    }

    pub fn courier(&self) -> &CourierEndpoint {
        &self.courier
    }

    pub fn courier_timeout(&self) -> Duration {
        Duration::from_millis(self.courier_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_concurrency(&self) -> usize {
        self.poll_concurrency
    }

    pub fn run_on_start(&self) -> bool {
        self.run_on_start
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn store_path(&self) -> &str {
        &self.store_path
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the poll interval
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    /// Builder method for tests to set the worker pool size
    pub fn with_poll_concurrency(mut self, concurrency: usize) -> Self {
        self.poll_concurrency = concurrency.max(1);
        self
    }

    /// Builder method for tests to point at a local courier
    pub fn with_courier_endpoint(mut self, endpoint: &str) -> Self {
        self.courier.endpoint = endpoint.to_string();
        self
    }
}
