//! Configuration management.

use serde::Deserialize;

use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Experimentation engine configuration
    #[serde(default)]
    pub experiments: ExperimentsConfig,

    /// Attribution engine configuration
    #[serde(default)]
    pub attribution: AttributionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Tuning knobs for variant assignment and significance readout.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentsConfig {
    /// Minimum impressions a variant needs before it enters the
    /// significance comparison.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,

    /// Confidence above which an auto-winner experiment recommends
    /// deployment without human review.
    #[serde(default = "default_auto_deploy_threshold")]
    pub auto_deploy_threshold: f64,

    /// Tolerance when checking that variant allocations sum to 1.0.
    #[serde(default = "default_allocation_epsilon")]
    pub allocation_epsilon: f64,
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            min_sample_size: default_min_sample_size(),
            auto_deploy_threshold: default_auto_deploy_threshold(),
            allocation_epsilon: default_allocation_epsilon(),
        }
    }
}

/// Tuning knobs for the attribution engine.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    /// Lookback window within which touchpoints earn credit.
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    /// Half-life for the time-decay model.
    #[serde(default = "default_half_life_days")]
    pub time_decay_half_life_days: i64,

    /// Endpoint shares for the position-based (U-shaped) model.
    #[serde(default = "default_position_share")]
    pub position_first_share: f64,

    #[serde(default = "default_position_share")]
    pub position_last_share: f64,

    /// Concurrent conversions attributed at once during batch reports.
    #[serde(default = "default_report_concurrency")]
    pub report_concurrency: usize,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            time_decay_half_life_days: default_half_life_days(),
            position_first_share: default_position_share(),
            position_last_share: default_position_share(),
            report_concurrency: default_report_concurrency(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_min_sample_size() -> u64 {
    100
}
fn default_auto_deploy_threshold() -> f64 {
    0.99
}
fn default_allocation_epsilon() -> f64 {
    1e-6
}
fn default_window_days() -> i64 {
    30
}
fn default_half_life_days() -> i64 {
    7
}
fn default_position_share() -> f64 {
    0.4
}
fn default_report_concurrency() -> usize {
    16
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SIGNALPATH").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SIGNALPATH").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
