//! Configuration management for reqbench
//!
//! Sources, highest priority first:
//! - Environment variables (`REQBENCH_` prefix, `__` separator)
//! - File named by `REQBENCH_CONFIG`
//! - `./config/reqbench.{toml,yaml,json}`
//! - Built-in defaults

use crate::stage::{RetryPolicy, Stage};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure for a harness run
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl HarnessConfig {
    /// Load configuration from every source and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("REQBENCH_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/reqbench").required(false));

        // Example: REQBENCH_RELIABILITY__RETRY__MAX_RETRIES=5
        builder = builder.add_source(
            Environment::with_prefix("REQBENCH")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("output.formats")
                .try_parsing(true),
        );

        let config: HarnessConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Self::set_defaults(Config::builder())?;
        let config: HarnessConfig = builder
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Database
            .set_default("database.backend", "memory")?
            .set_default("database.image", "postgres")?
            .set_default("database.tag", "16-alpine")?
            .set_default("database.username", "reqbench")?
            .set_default("database.password", "reqbench")?
            .set_default("database.name", "reqbench")?
            .set_default("database.max_open", 25)?
            .set_default("database.max_idle", 5)?
            .set_default("database.conn_lifetime_secs", 300)?
            // Server
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.health_probe_window_ms", 5000)?
            .set_default("server.health_probe_interval_ms", 100)?
            .set_default("server.shutdown_grace_ms", 5000)?
            .set_default("server.artificial_latency_ms", 0)?
            // Client
            .set_default("client.pool_max_idle_per_host", 64)?
            .set_default("client.pool_idle_timeout_secs", 90)?
            .set_default("client.tcp_keepalive_secs", 60)?
            // Reliability: stage timeouts
            .set_default("reliability.timeouts.default_ms", 30_000)?
            .set_default("reliability.timeouts.database_ms", 60_000)?
            .set_default("reliability.timeouts.http_ms", 30_000)?
            .set_default("reliability.timeouts.cleanup_ms", 10_000)?
            .set_default("reliability.timeouts.preflight_ms", 5_000)?
            .set_default("reliability.timeouts.server_start_ms", 60_000)?
            // Reliability: retry
            .set_default("reliability.retry.max_retries", 3)?
            .set_default("reliability.retry.initial_delay_ms", 100)?
            .set_default("reliability.retry.backoff_factor", 2.0)?
            .set_default("reliability.retry.max_delay_ms", 5000)?
            // Reliability: resource monitor
            .set_default("reliability.monitor.interval_ms", 1000)?
            .set_default("reliability.monitor.memory_warning_mb", 1024.0)?
            .set_default("reliability.monitor.memory_critical_mb", 2048.0)?
            .set_default("reliability.monitor.tasks_warning", 5000.0)?
            .set_default("reliability.monitor.tasks_critical", 10_000.0)?
            .set_default("reliability.monitor.db_connections_warning", 20.0)?
            .set_default("reliability.monitor.db_connections_critical", 24.0)?
            // Metrics
            .set_default("metrics.slow_request_threshold_ms", 1000)?
            .set_default("metrics.sample_channel_capacity", 4096)?
            .set_default("metrics.cleanup_reclaim_cycles", 2)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Auth
            .set_default("auth.secret", "reqbench-local-secret")?
            .set_default("auth.token_ttl_secs", 3600)?
            // Output
            .set_default("output.dir", "target/reqbench")?
            .set_default("output.formats", vec!["text"])
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.database.backend.as_str(), "memory" | "container" | "external") {
            return Err(ConfigError::Message(format!(
                "database.backend must be memory, container, or external (got `{}`)",
                self.database.backend
            )));
        }

        if self.database.backend == "external" && self.database.external_url.is_none() {
            return Err(ConfigError::Message(
                "database.external_url is required for the external backend".to_string(),
            ));
        }

        if self.database.max_open == 0 {
            return Err(ConfigError::Message(
                "database.max_open must be > 0".to_string(),
            ));
        }

        if self.database.max_idle > self.database.max_open {
            return Err(ConfigError::Message(
                "database.max_idle must be <= database.max_open".to_string(),
            ));
        }

        let timeouts = &self.reliability.timeouts;
        if [
            timeouts.default_ms,
            timeouts.database_ms,
            timeouts.http_ms,
            timeouts.cleanup_ms,
            timeouts.preflight_ms,
            timeouts.server_start_ms,
        ]
        .contains(&0)
        {
            return Err(ConfigError::Message(
                "reliability.timeouts values must be > 0".to_string(),
            ));
        }

        if self.reliability.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Message(
                "reliability.retry.backoff_factor must be >= 1.0".to_string(),
            ));
        }

        let monitor = &self.reliability.monitor;
        if monitor.interval_ms == 0 {
            return Err(ConfigError::Message(
                "reliability.monitor.interval_ms must be > 0".to_string(),
            ));
        }
        for (name, warning, critical) in [
            ("memory", monitor.memory_warning_mb, monitor.memory_critical_mb),
            ("tasks", monitor.tasks_warning, monitor.tasks_critical),
            (
                "db_connections",
                monitor.db_connections_warning,
                monitor.db_connections_critical,
            ),
        ] {
            if warning >= critical {
                return Err(ConfigError::Message(format!(
                    "reliability.monitor {name} warning threshold must be below critical"
                )));
            }
        }

        if self.metrics.sample_channel_capacity == 0 {
            return Err(ConfigError::Message(
                "metrics.sample_channel_capacity must be > 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Message(
                "logging.format must be pretty or json".to_string(),
            ));
        }

        for format in &self.output.formats {
            if !matches!(format.as_str(), "text" | "markdown" | "json" | "csv") {
                return Err(ConfigError::Message(format!(
                    "unknown output format `{format}`"
                )));
            }
        }

        Ok(())
    }
}

/// Ephemeral database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// `memory`, `container`, or `external`
    pub backend: String,

    /// Container image name
    pub image: String,

    /// Container image tag
    pub tag: String,

    pub username: String,
    pub password: String,
    pub name: String,

    /// Connection URL used by the `external` backend
    #[serde(default)]
    pub external_url: Option<String>,

    /// Maximum open connections
    pub max_open: u32,

    /// Connections kept warm while idle
    pub max_idle: u32,

    /// Maximum lifetime of a pooled connection in seconds
    pub conn_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            image: "postgres".to_string(),
            tag: "16-alpine".to_string(),
            username: "reqbench".to_string(),
            password: "reqbench".to_string(),
            name: "reqbench".to_string(),
            external_url: None,
            max_open: 25,
            max_idle: 5,
            conn_lifetime_secs: 300,
        }
    }
}

impl DatabaseConfig {
    pub fn conn_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_lifetime_secs)
    }
}

/// In-process server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,

    /// Total window for the readiness probe
    pub health_probe_window_ms: u64,

    /// Delay between readiness probes
    pub health_probe_interval_ms: u64,

    /// Grace window for in-flight requests on shutdown
    pub shutdown_grace_ms: u64,

    /// Delay injected before every non-health route
    pub artificial_latency_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            health_probe_window_ms: 5000,
            health_probe_interval_ms: 100,
            shutdown_grace_ms: 5000,
            artificial_latency_ms: 0,
        }
    }
}

impl ServerConfig {
    pub fn health_probe_window(&self) -> Duration {
        Duration::from_millis(self.health_probe_window_ms)
    }

    pub fn health_probe_interval(&self) -> Duration {
        Duration::from_millis(self.health_probe_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn artificial_latency(&self) -> Option<Duration> {
        (self.artificial_latency_ms > 0).then(|| Duration::from_millis(self.artificial_latency_ms))
    }
}

/// HTTP client keep-alive pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
    pub tcp_keepalive_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 64,
            pool_idle_timeout_secs: 90,
            tcp_keepalive_secs: 60,
        }
    }
}

/// Timeouts, retry, and resource monitoring
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReliabilityConfig {
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Per-stage timeout budgets in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    pub default_ms: u64,
    pub database_ms: u64,
    pub http_ms: u64,
    pub cleanup_ms: u64,
    pub preflight_ms: u64,
    pub server_start_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default_ms: Stage::Default.default_timeout().as_millis() as u64,
            database_ms: Stage::Database.default_timeout().as_millis() as u64,
            http_ms: Stage::Http.default_timeout().as_millis() as u64,
            cleanup_ms: Stage::Cleanup.default_timeout().as_millis() as u64,
            preflight_ms: Stage::Preflight.default_timeout().as_millis() as u64,
            server_start_ms: Stage::ServerStart.default_timeout().as_millis() as u64,
        }
    }
}

impl TimeoutsConfig {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        let ms = match stage {
            Stage::Default => self.default_ms,
            Stage::Database => self.database_ms,
            Stage::Http => self.http_ms,
            Stage::Cleanup => self.cleanup_ms,
            Stage::Preflight => self.preflight_ms,
            Stage::ServerStart => self.server_start_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Resource monitor cadence and thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub memory_warning_mb: f64,
    pub memory_critical_mb: f64,
    pub tasks_warning: f64,
    pub tasks_critical: f64,
    pub db_connections_warning: f64,
    pub db_connections_critical: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            memory_warning_mb: 1024.0,
            memory_critical_mb: 2048.0,
            tasks_warning: 5000.0,
            tasks_critical: 10_000.0,
            db_connections_warning: 20.0,
            db_connections_critical: 24.0,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Metrics collection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Samples slower than this emit a warning
    pub slow_request_threshold_ms: u64,

    /// Bounded channel between sustained workers and the collector
    pub sample_channel_capacity: usize,

    /// Reclaim cycles run at the end of cleanup
    pub cleanup_reclaim_cycles: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            slow_request_threshold_ms: 1000,
            sample_channel_capacity: 4096,
            cleanup_reclaim_cycles: 2,
        }
    }
}

impl MetricsConfig {
    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Bearer-token signing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: "reqbench-local-secret".to_string(),
            token_ttl_secs: 3600,
        }
    }
}

/// Report output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub dir: String,

    /// Any of `text`, `markdown`, `json`, `csv`
    pub formats: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "target/reqbench".to_string(),
            formats: vec!["text".to_string()],
        }
    }
}
