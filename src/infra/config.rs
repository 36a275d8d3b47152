//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Floor for the post-decision cooldown
pub const MIN_COOLDOWN_MS: u64 = 3000;

/// Floor for the recognition window capacity
pub const MIN_WINDOW: usize = 2;

/// Floor for region idle eviction; must outlast the engine's 1 s tick
pub const MIN_REGION_IDLE_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    Http,
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorMode {
    Http,
    Mqtt,
    Log,
}

impl ActuatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorMode::Http => "http",
            ActuatorMode::Mqtt => "mqtt",
            ActuatorMode::Log => "log",
        }
    }
}

impl LedgerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerMode::Http => "http",
            LedgerMode::File => "file",
            LedgerMode::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Topic carrying per-frame plate readings
    #[serde(default = "default_readings_topic")]
    pub readings_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Consecutive eventloop errors before the readings source is declared exhausted
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

fn default_readings_topic() -> String {
    "parking/plates".to_string()
}

fn default_max_consecutive_errors() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub mode: LedgerMode,
    #[serde(default)]
    pub http_url: String,
    #[serde(default = "default_bookings_file")]
    pub file: String,
    #[serde(default = "default_ledger_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_bookings_file() -> String {
    "bookings.json".to_string()
}

fn default_ledger_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    pub mode: ActuatorMode,
    #[serde(default)]
    pub http_url: String,
    #[serde(default = "default_gate_topic")]
    pub mqtt_topic: String,
    #[serde(default = "default_gate_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_gate_topic() -> String {
    "parking/gate/command".to_string()
}

fn default_gate_timeout_ms() -> u64 {
    2000
}

fn default_cooldown_ms() -> u64 {
    MIN_COOLDOWN_MS
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    /// One stabilizer per region id (false = one shared stabilizer)
    #[serde(default = "default_per_region")]
    pub per_region: bool,
    /// Identical consecutive readings needed to confirm
    #[serde(default = "default_window")]
    pub window: usize,
    /// Discard readings that fail the strict plate grammar
    #[serde(default)]
    pub require_strict_format: bool,
    /// Drop a region's stabilizer after this long without readings
    #[serde(default = "default_region_idle_secs")]
    pub region_idle_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            per_region: default_per_region(),
            window: default_window(),
            require_strict_format: false,
            region_idle_secs: default_region_idle_secs(),
        }
    }
}

fn default_per_region() -> bool {
    true
}

fn default_window() -> usize {
    MIN_WINDOW
}

fn default_region_idle_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, prometheus_port: default_prometheus_port() }
    }
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessLogConfig {
    /// File path for decision records (JSONL format)
    #[serde(default = "default_access_log_file")]
    pub file: String,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self { file: default_access_log_file() }
    }
}

fn default_access_log_file() -> String {
    "access.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for decision events (QoS 1)
    #[serde(default = "default_decisions_topic")]
    pub decisions_topic: String,
    /// Topic for gate state changes (QoS 0)
    #[serde(default = "default_gate_state_topic")]
    pub gate_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            decisions_topic: default_decisions_topic(),
            gate_topic: default_gate_state_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_decisions_topic() -> String {
    "parking/decisions".to_string()
}

fn default_gate_state_topic() -> String {
    "parking/gate".to_string()
}

fn default_metrics_topic() -> String {
    "parking/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "lot-a", "north-gate")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "parking".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    pub ledger: LedgerConfig,
    pub gate: GateConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub access_log: AccessLogConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_readings_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_max_consecutive_errors: u32,
    ledger_mode: LedgerMode,
    ledger_url: String,
    ledger_file: String,
    ledger_timeout_ms: u64,
    gate_mode: ActuatorMode,
    gate_url: String,
    gate_mqtt_topic: String,
    gate_timeout_ms: u64,
    cooldown_ms: u64,
    per_region: bool,
    window: usize,
    require_strict_format: bool,
    region_idle_secs: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
    access_log_file: String,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    // MQTT Egress config
    mqtt_egress_enabled: bool,
    mqtt_egress_decisions_topic: String,
    mqtt_egress_gate_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: "parking".to_string(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_readings_topic: "parking/plates".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_max_consecutive_errors: 10,
            ledger_mode: LedgerMode::File,
            ledger_url: String::new(),
            ledger_file: "bookings.json".to_string(),
            ledger_timeout_ms: 2000,
            gate_mode: ActuatorMode::Log,
            gate_url: String::new(),
            gate_mqtt_topic: "parking/gate/command".to_string(),
            gate_timeout_ms: 2000,
            cooldown_ms: MIN_COOLDOWN_MS,
            per_region: true,
            window: MIN_WINDOW,
            require_strict_format: false,
            region_idle_secs: 10,
            metrics_interval_secs: 10,
            prometheus_port: 9090,
            config_file: "default".to_string(),
            access_log_file: "access.jsonl".to_string(),
            broker_enabled: true,
            broker_bind_address: "0.0.0.0".to_string(),
            broker_port: 1883,
            mqtt_egress_enabled: true,
            mqtt_egress_decisions_topic: "parking/decisions".to_string(),
            mqtt_egress_gate_topic: "parking/gate".to_string(),
            mqtt_egress_metrics_topic: "parking/metrics".to_string(),
            mqtt_egress_metrics_interval_secs: 5,
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

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_readings_topic: toml_config.mqtt.readings_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_max_consecutive_errors: toml_config.mqtt.max_consecutive_errors,
            ledger_mode: toml_config.ledger.mode,
            ledger_url: toml_config.ledger.http_url,
            ledger_file: toml_config.ledger.file,
            ledger_timeout_ms: toml_config.ledger.timeout_ms,
            gate_mode: toml_config.gate.mode,
            gate_url: toml_config.gate.http_url,
            gate_mqtt_topic: toml_config.gate.mqtt_topic,
            gate_timeout_ms: toml_config.gate.timeout_ms,
            cooldown_ms: toml_config.gate.cooldown_ms.max(MIN_COOLDOWN_MS),
            per_region: toml_config.recognition.per_region,
            window: toml_config.recognition.window.max(MIN_WINDOW),
            require_strict_format: toml_config.recognition.require_strict_format,
            region_idle_secs: toml_config.recognition.region_idle_secs.max(MIN_REGION_IDLE_SECS),
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: path.display().to_string(),
            access_log_file: toml_config.access_log.file,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_decisions_topic: toml_config.mqtt_egress.decisions_topic,
            mqtt_egress_gate_topic: toml_config.mqtt_egress.gate_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
        })
    }

    /// Load configuration from args - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_readings_topic(&self) -> &str {
        &self.mqtt_readings_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_max_consecutive_errors(&self) -> u32 {
        self.mqtt_max_consecutive_errors
    }

    pub fn ledger_mode(&self) -> &LedgerMode {
        &self.ledger_mode
    }

    pub fn ledger_url(&self) -> &str {
        &self.ledger_url
    }

    pub fn ledger_file(&self) -> &str {
        &self.ledger_file
    }

    pub fn ledger_timeout_ms(&self) -> u64 {
        self.ledger_timeout_ms
    }

    pub fn gate_mode(&self) -> &ActuatorMode {
        &self.gate_mode
    }

    pub fn gate_url(&self) -> &str {
        &self.gate_url
    }

    pub fn gate_mqtt_topic(&self) -> &str {
        &self.gate_mqtt_topic
    }

    pub fn gate_timeout_ms(&self) -> u64 {
        self.gate_timeout_ms
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    pub fn per_region(&self) -> bool {
        self.per_region
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn require_strict_format(&self) -> bool {
        self.require_strict_format
    }

    pub fn region_idle_secs(&self) -> u64 {
        self.region_idle_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn access_log_file(&self) -> &str {
        &self.access_log_file
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

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_decisions_topic(&self) -> &str {
        &self.mqtt_egress_decisions_topic
    }

    pub fn mqtt_egress_gate_topic(&self) -> &str {
        &self.mqtt_egress_gate_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    /// Builder method to override the recognition policy
    pub fn with_recognition(mut self, per_region: bool, require_strict_format: bool) -> Self {
        self.per_region = per_region;
        self.require_strict_format = require_strict_format;
        self
    }

    /// Builder method to point the file ledger elsewhere
    pub fn with_ledger_file(mut self, path: &str) -> Self {
        self.ledger_mode = LedgerMode::File;
        self.ledger_file = path.to_string();
        self
    }

    /// Builder method to select the actuator (dry runs force `Log`)
    pub fn with_gate_mode(mut self, mode: ActuatorMode) -> Self {
        self.gate_mode = mode;
        self
    }

    /// Builder method for tests to set the access log path
    pub fn with_access_log_file(mut self, path: &str) -> Self {
        self.access_log_file = path.to_string();
        self
    }
}
