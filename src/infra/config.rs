//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::incident::IncidentType;
use crate::domain::types::{Subject, SubjectRecord};
use anyhow::Context;
use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "fieldwatch".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Samples older than this mark the subject offline
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    /// How far behind the current sample a late arrival may be and still replace it
    #[serde(default = "default_reorder_tolerance_secs")]
    pub reorder_tolerance_secs: u64,
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: u64,
    /// Per-subject cap on retained history points
    #[serde(default = "default_history_max_points")]
    pub history_max_points: usize,
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,
    /// Geofence radius for subjects without their own
    #[serde(default = "default_radius_m")]
    pub default_radius_m: f64,
}

fn default_staleness_secs() -> u64 {
    300
}

fn default_reorder_tolerance_secs() -> u64 {
    5
}

fn default_max_future_skew_secs() -> u64 {
    60
}

fn default_history_retention_secs() -> u64 {
    86_400
}

fn default_history_max_points() -> usize {
    5000
}

fn default_retention_sweep_secs() -> u64 {
    60
}

fn default_radius_m() -> f64 {
    100.0
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
            reorder_tolerance_secs: default_reorder_tolerance_secs(),
            max_future_skew_secs: default_max_future_skew_secs(),
            history_retention_secs: default_history_retention_secs(),
            history_max_points: default_history_max_points(),
            retention_sweep_secs: default_retention_sweep_secs(),
            default_radius_m: default_radius_m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShiftConfig {
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: u32,
    /// Offset of shift-window clock times from UTC (e.g. 420 for UTC+7)
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_grace_minutes() -> u32 {
    15
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self { grace_minutes: default_grace_minutes(), utc_offset_minutes: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Highest priority first
    #[serde(default = "default_priority")]
    pub priority: Vec<IncidentType>,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_priority() -> Vec<IncidentType> {
    IncidentType::ALL.to_vec()
}

fn default_dedup_window_secs() -> u64 {
    600
}

fn default_event_buffer() -> usize {
    1000
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            dedup_window_secs: default_dedup_window_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_server_url")]
    pub server_url: String,
}

fn default_poll_interval_secs() -> u64 {
    20
}

fn default_poll_timeout_secs() -> u64 {
    20
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            server_url: default_server_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Periodic summary log cadence; 0 disables it
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Events go to `<prefix>/bypass` and `<prefix>/read`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "fieldwatch".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            topic_prefix: default_topic_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// JSONL file for resolution events (empty disables)
    #[serde(default = "default_audit_file")]
    pub file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { file: default_audit_file() }
    }
}

fn default_audit_file() -> String {
    "alert-events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub shift: ShiftConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub subjects: Vec<SubjectRecord>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    port: u16,
    staleness_secs: u64,
    reorder_tolerance_secs: u64,
    max_future_skew_secs: u64,
    history_retention_secs: u64,
    history_max_points: usize,
    retention_sweep_secs: u64,
    default_radius_m: f64,
    grace_minutes: u32,
    utc_offset_minutes: i32,
    alert_priority: Vec<IncidentType>,
    dedup_window_secs: u64,
    event_buffer: usize,
    poll_interval_secs: u64,
    poll_timeout_secs: u64,
    server_url: String,
    metrics_interval_secs: u64,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_topic_prefix: String,
    audit_file: String,
    subjects: Vec<Subject>,
    config_file: String,
}

fn choose_config_path(cli: Option<&str>, env_value: Option<String>) -> String {
    cli.map(str::to_string)
        .or_else(|| env_value.filter(|p| !p.trim().is_empty()))
        .unwrap_or_else(|| "config/dev.toml".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), Vec::new(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, subjects: Vec<Subject>, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            staleness_secs: toml_config.presence.staleness_secs,
            reorder_tolerance_secs: toml_config.presence.reorder_tolerance_secs,
            max_future_skew_secs: toml_config.presence.max_future_skew_secs,
            history_retention_secs: toml_config.presence.history_retention_secs,
            history_max_points: toml_config.presence.history_max_points,
            retention_sweep_secs: toml_config.presence.retention_sweep_secs,
            default_radius_m: toml_config.presence.default_radius_m,
            grace_minutes: toml_config.shift.grace_minutes,
            utc_offset_minutes: toml_config.shift.utc_offset_minutes,
            alert_priority: toml_config.alerts.priority,
            dedup_window_secs: toml_config.alerts.dedup_window_secs,
            event_buffer: toml_config.alerts.event_buffer,
            poll_interval_secs: toml_config.escalation.poll_interval_secs,
            poll_timeout_secs: toml_config.escalation.poll_timeout_secs,
            server_url: toml_config.escalation.server_url,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_topic_prefix: toml_config.mqtt.topic_prefix,
            audit_file: toml_config.audit.file,
            subjects,
            config_file,
        }
    }

    /// Config path: explicit `--config` value, then `CONFIG_FILE`, then the dev default
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        choose_config_path(cli, env::var("CONFIG_FILE").ok())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, path.display().to_string())
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: String) -> anyhow::Result<Self> {
        let mut toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {source}"))?;

        if toml_config.alerts.priority.is_empty() {
            toml_config.alerts.priority = default_priority();
        }

        let default_radius = toml_config.presence.default_radius_m;
        let subjects = std::mem::take(&mut toml_config.subjects)
            .into_iter()
            .map(|record| {
                let id = record.id.clone();
                record
                    .into_subject(default_radius)
                    .with_context(|| format!("Invalid subject {id} in {source}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self::from_toml(toml_config, subjects, source))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), path = %path, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(cli_path: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(cli_path))
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn staleness(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.staleness_secs as i64)
    }

    pub fn reorder_tolerance(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.reorder_tolerance_secs as i64)
    }

    pub fn max_future_skew(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.max_future_skew_secs as i64)
    }

    pub fn history_retention(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.history_retention_secs as i64)
    }

    pub fn history_max_points(&self) -> usize {
        self.history_max_points
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs.max(1))
    }

    pub fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    pub fn shift_grace(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.grace_minutes as i64)
    }

    /// Offset of shift clock times; out-of-range values fall back to UTC
    pub fn shift_utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix())
    }

    pub fn alert_priority(&self) -> &[IncidentType] {
        &self.alert_priority
    }

    pub fn dedup_window(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.dedup_window_secs as i64)
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Cadence of the periodic metrics log line; `None` when set to 0
    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_secs > 0).then(|| Duration::from_secs(self.metrics_interval_secs))
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

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_topic_prefix(&self) -> &str {
        &self.mqtt_topic_prefix
    }

    pub fn audit_file(&self) -> Option<&str> {
        if self.audit_file.trim().is_empty() {
            None
        } else {
            Some(&self.audit_file)
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the roster
    pub fn with_subjects(mut self, subjects: Vec<Subject>) -> Self {
        self.subjects = subjects;
        self
    }

    /// Builder method for tests to set the staleness threshold
    pub fn with_staleness_secs(mut self, secs: u64) -> Self {
        self.staleness_secs = secs;
        self
    }

    /// Builder method for tests to set the alert priority order
    pub fn with_alert_priority(mut self, priority: Vec<IncidentType>) -> Self {
        self.alert_priority = priority;
        self
    }
}
