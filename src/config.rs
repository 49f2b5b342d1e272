//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage::engine::{CsvFormat, StorageConfig as EngineConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_max_gap")]
    pub max_gap: i64,

    #[serde(default = "default_max_datapoints")]
    pub max_datapoints: i64,

    #[serde(default = "default_min_interval")]
    pub min_interval: u32,

    #[serde(default = "default_max_past_secs")]
    pub max_past_secs: i64,

    #[serde(default = "default_max_future_secs")]
    pub max_future_secs: i64,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_csv_field_separator")]
    pub csv_field_separator: String,

    #[serde(default = "default_csv_decimal_places")]
    pub csv_decimal_places: usize,

    #[serde(default = "default_csv_decimal_separator")]
    pub csv_decimal_separator: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("fina").to_string_lossy().to_string())
        .unwrap_or_else(|| "./fina_data".to_string())
}

fn default_max_gap() -> i64 {
    1_000_000
}

fn default_max_datapoints() -> i64 {
    3000
}

fn default_min_interval() -> u32 {
    5
}

fn default_max_past_secs() -> i64 {
    3600 * 24 * 365 * 5 // 5 years
}

fn default_max_future_secs() -> i64 {
    3600 * 48 // 48 hours
}

fn default_flush_interval() -> u64 {
    5000 // 5 seconds
}

fn default_csv_field_separator() -> String {
    ",".to_string()
}

fn default_csv_decimal_places() -> usize {
    2
}

fn default_csv_decimal_separator() -> String {
    ".".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_gap: default_max_gap(),
            max_datapoints: default_max_datapoints(),
            min_interval: default_min_interval(),
            max_past_secs: default_max_past_secs(),
            max_future_secs: default_max_future_secs(),
            flush_interval_ms: default_flush_interval(),
            csv_field_separator: default_csv_field_separator(),
            csv_decimal_places: default_csv_decimal_places(),
            csv_decimal_separator: default_csv_decimal_separator(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_enable_export")]
    pub enable_export: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8083
}

fn default_enable_export() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_export: default_enable_export(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber. `RUST_LOG` wins over `level` when set.
    /// Logs go to stderr so command output on stdout stays clean.
    pub fn init(&self) -> Result<(), ConfigError> {
        use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("fina={},tower_http={}", self.level, self.level))
        });
        let registry = tracing_subscriber::registry().with(filter);

        let result = match self.format.as_str() {
            "json" => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            _ => registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init(),
        };

        result.map_err(|e| ConfigError::Invalid(format!("logging setup failed: {}", e)))
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fina").join("config.toml")),
            Some(PathBuf::from("/etc/fina/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Engine settings derived from the `[storage]` section
    pub fn storage_config(&self) -> Result<EngineConfig, ConfigError> {
        let storage = &self.storage;

        let field_separator = match storage.csv_field_separator.as_bytes() {
            [b] => *b,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "csv_field_separator must be a single byte, got {:?}",
                    storage.csv_field_separator
                )))
            }
        };

        let mut chars = storage.csv_decimal_separator.chars();
        let decimal_separator = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "csv_decimal_separator must be a single character, got {:?}",
                    storage.csv_decimal_separator
                )))
            }
        };

        if storage.min_interval == 0 {
            return Err(ConfigError::Invalid(
                "min_interval must be at least 1".to_string(),
            ));
        }

        Ok(EngineConfig {
            data_dir: expand_home(&storage.data_dir),
            min_interval: storage.min_interval,
            max_gap: storage.max_gap,
            max_datapoints: storage.max_datapoints,
            max_past_secs: storage.max_past_secs,
            max_future_secs: storage.max_future_secs,
            flush_interval_ms: storage.flush_interval_ms,
            csv: CsvFormat {
                field_separator,
                decimal_places: storage.csv_decimal_places,
                decimal_separator,
            },
        })
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Storage overrides
        if let Ok(data_dir) = std::env::var("FINA_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        // API overrides
        if let Ok(host) = std::env::var("FINA_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("FINA_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("FINA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FINA_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Fina Configuration
#
# Environment variables override these settings:
# - FINA_DATA_DIR
# - FINA_API_HOST
# - FINA_API_PORT
# - FINA_LOG_LEVEL
# - FINA_LOG_FORMAT

[storage]
# Directory holding <id>.meta and <id>.dat files
data_dir = "~/.local/share/fina"

# Largest number of padding samples a single write may create
max_gap = 1000000

# Largest number of points a range read may return
max_datapoints = 3000

# Smallest accepted series interval (seconds)
min_interval = 5

# Accepted write window relative to now (seconds)
max_past_secs = 157680000
max_future_secs = 172800

# How often buffered samples are saved to disk (ms)
flush_interval_ms = 5000

# CSV export formatting
csv_field_separator = ","
csv_decimal_places = 2
csv_decimal_separator = "."

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8083

# Serve raw and CSV export endpoints
enable_export = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
