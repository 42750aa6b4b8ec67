//! Configuration management for GeoResolve
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::engine::ConnectionCandidate;
use crate::export::ExportFormat;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Engine connection configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Resolution pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Gateway server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Session provider: http, mock
    #[serde(default = "default_engine_provider")]
    pub provider: String,

    /// Remote engine base URL, overridable by the credentials file
    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    /// Local engine base URL
    #[serde(default = "default_local_url")]
    pub local_url: String,

    /// Credentials file for the remote strategy.
    /// Falls back to `$HOME/.klab/testcredentials.properties`.
    pub credentials_path: Option<PathBuf>,

    /// Disable the local fallback candidate
    #[serde(default = "default_enabled")]
    pub local_fallback: bool,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Time allowed for opening a session, per candidate
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// First delay between ticket status polls
    #[serde(default = "default_poll_initial")]
    pub poll_initial_ms: u64,

    /// Upper bound on the delay between ticket status polls
    #[serde(default = "default_poll_max")]
    pub poll_max_ms: u64,

    /// Caller-side limit on waiting for a ticket (0 waits forever)
    #[serde(default = "default_ticket_timeout")]
    pub ticket_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Semantic type used to establish the context
    #[serde(default = "default_base_observable")]
    pub base_observable: String,

    /// Grid resolution for the context geometry
    #[serde(default = "default_resolution")]
    pub resolution: String,

    /// Output file stem inside the workspace
    #[serde(default = "default_output_stem")]
    pub output_stem: String,

    /// Output file extension; follows the export format when unset
    #[serde(default)]
    pub output_extension: Option<String>,

    /// Export format requested from the engine
    #[serde(default = "default_export_format")]
    pub export_format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_server_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum executions running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_engine_provider() -> String { "http".to_string() }
fn default_remote_url() -> String { "https://integratedmodelling.org/modeler".to_string() }
fn default_local_url() -> String { "http://127.0.0.1:8283/modeler".to_string() }
fn default_request_timeout() -> u64 { 60 }
fn default_connect_timeout() -> u64 { 15 }
fn default_poll_initial() -> u64 { 250 }
fn default_poll_max() -> u64 { 5_000 }
fn default_ticket_timeout() -> u64 { 1_800 }
fn default_base_observable() -> String { crate::DEFAULT_BASE_OBSERVABLE.to_string() }
fn default_resolution() -> String { crate::DEFAULT_RESOLUTION.to_string() }
fn default_output_stem() -> String { "result".to_string() }
fn default_export_format() -> String { "bytestream".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_server_request_timeout() -> u64 { 3_600 }
fn default_max_concurrent() -> usize { 8 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }
fn default_service_name() -> String { "georesolve".to_string() }
fn default_rate_limit() -> u32 { 5 }
fn default_burst() -> u32 { 10 }
fn default_enabled() -> bool { true }

/// Per-user credentials file used when none is configured.
pub fn default_credentials_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_default();
    home.join(".klab").join("testcredentials.properties")
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__ENGINE__REMOTE_URL=https://engine.example.org
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file, still honouring APP__ overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl EngineConfig {
    /// Ordered connection candidates: remote with credentials, then local.
    ///
    /// `credentials_override` wins over the configured path, which wins over
    /// the per-user default.
    pub fn candidates(&self, credentials_override: Option<&Path>) -> Vec<ConnectionCandidate> {
        let credentials = credentials_override
            .map(Path::to_path_buf)
            .or_else(|| self.credentials_path.clone())
            .unwrap_or_else(default_credentials_path);

        let mut candidates = vec![ConnectionCandidate::remote(credentials)];
        if self.local_fallback {
            candidates.push(ConnectionCandidate::local());
        }
        candidates
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `None` when ticket waits are unbounded
    pub fn ticket_timeout(&self) -> Option<Duration> {
        (self.ticket_timeout_secs > 0).then(|| Duration::from_secs(self.ticket_timeout_secs))
    }
}

impl PipelineConfig {
    /// File name for an execution, e.g. `result_scenario-a.tif`
    pub fn output_file_name(&self, suffix: Option<&str>, format: ExportFormat) -> String {
        let suffix = match suffix.map(str::trim) {
            Some(s) if !s.is_empty() && s.starts_with('_') => s.to_string(),
            Some(s) if !s.is_empty() => format!("_{}", s),
            _ => String::new(),
        };
        let extension = self
            .output_extension
            .as_deref()
            .map(|ext| ext.trim_start_matches('.'))
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| format.file_extension());
        format!("{}{}.{}", self.output_stem, suffix, extension)
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: default_engine_provider(),
            remote_url: default_remote_url(),
            local_url: default_local_url(),
            credentials_path: None,
            local_fallback: default_enabled(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            poll_initial_ms: default_poll_initial(),
            poll_max_ms: default_poll_max(),
            ticket_timeout_secs: default_ticket_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_observable: default_base_observable(),
            resolution: default_resolution(),
            output_stem: default_output_stem(),
            output_extension: None,
            export_format: default_export_format(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_server_request_timeout(),
            max_concurrent_executions: default_max_concurrent(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
