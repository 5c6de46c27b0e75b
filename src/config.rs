use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compression::{CompressionConfig, JpegBackend, DEFAULT_QUALITY};
use crate::driver::{JobSettings, DEFAULT_PROGRESS_EVERY};
use crate::store::ContentRef;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub job: JobConfig,
    pub compression: CompressionSection,
    pub probe: ProbeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub worker_threads: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Directory holding the content tree.
    pub root: PathBuf,
    /// Base URL under which the content tree is publicly served.
    pub public_base_url: String,
    /// Identity the scheduled job runs as.
    pub principal: String,
    pub interval_secs: u64,
    pub run_on_startup: bool,
    pub progress_every: u64,
    pub abort_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSection {
    /// Out-of-range or non-numeric values fall back to the default quality.
    #[serde(deserialize_with = "lenient_quality")]
    pub quality: u8,
    pub jpeg_backend: JpegBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3031,
            worker_threads: None,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./content"),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            principal: "scheduled-optimizer".to_string(),
            interval_secs: 300,
            run_on_startup: false,
            progress_every: DEFAULT_PROGRESS_EVERY,
            abort_on_error: true,
        }
    }
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            jpeg_backend: JpegBackend::MozJpeg,
        }
    }
}

fn parse_quality(value: &toml::Value) -> Option<u8> {
    let quality = match value {
        toml::Value::Integer(q) => *q,
        toml::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if (1..=100).contains(&quality) {
        u8::try_from(quality).ok()
    } else {
        None
    }
}

fn lenient_quality<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = toml::Value::deserialize(deserializer)?;
    Ok(parse_quality(&value).unwrap_or_else(|| {
        log::warn!("Ignoring invalid compression quality {}, using {}", value, DEFAULT_QUALITY);
        DEFAULT_QUALITY
    }))
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if file doesn't exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration from environment variables and file
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_path(None)
    }

    /// Like [`Config::load`], with an explicit file taking precedence over
    /// `BLOB_OPTIMIZER_CONFIG`.
    pub fn load_with_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(
                std::env::var("BLOB_OPTIMIZER_CONFIG").unwrap_or_else(|_| "config.toml".to_string()),
            ),
        };

        let mut config = Self::load_from_file(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides. Values that do not parse are
    /// ignored and the current setting is kept.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("BLOB_OPTIMIZER_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("BLOB_OPTIMIZER_PORT") {
            if let Ok(port_num) = port.parse::<u16>() {
                self.server.port = port_num;
            }
        }

        if let Ok(root) = std::env::var("BLOB_OPTIMIZER_ROOT") {
            self.job.root = PathBuf::from(root);
        }

        if let Ok(url) = std::env::var("BLOB_OPTIMIZER_BASE_URL") {
            self.job.public_base_url = url;
        }

        if let Ok(principal) = std::env::var("BLOB_OPTIMIZER_PRINCIPAL") {
            self.job.principal = principal;
        }

        if let Ok(quality) = std::env::var("BLOB_OPTIMIZER_QUALITY") {
            if let Ok(q) = quality.trim().parse::<u8>() {
                if (1..=100).contains(&q) {
                    self.compression.quality = q;
                }
            }
        }

        if let Ok(interval) = std::env::var("BLOB_OPTIMIZER_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.job.interval_secs = secs;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("Port cannot be 0".to_string()));
        }

        if !(1..=100).contains(&self.compression.quality) {
            return Err(ConfigError::ValidationError(
                "Quality must be between 1 and 100".to_string(),
            ));
        }

        if self.job.interval_secs == 0 {
            return Err(ConfigError::ValidationError("Job interval cannot be 0".to_string()));
        }

        if self.job.progress_every == 0 {
            return Err(ConfigError::ValidationError("progress_every cannot be 0".to_string()));
        }

        if self.probe.timeout_secs == 0 {
            return Err(ConfigError::ValidationError("Probe timeout cannot be 0".to_string()));
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Self::default();
        let toml_content = toml::to_string_pretty(&config)
            .map_err(|e| ConfigError::SerializeError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_content)
            .map_err(|e| ConfigError::IoError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get the bind address for the admin server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            quality: self.compression.quality,
            jpeg_backend: self.compression.jpeg_backend,
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            root: ContentRef::new(""),
            progress_every: self.job.progress_every,
            abort_on_error: self.job.abort_on_error,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.job.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializeError(String),
}
