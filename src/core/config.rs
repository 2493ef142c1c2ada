//! Configuration management
//!
//! Precedence, lowest first: built-in defaults, TOML file (`--config`),
//! `CATALOG_*` environment variables (`__` separates sections, e.g.
//! `CATALOG_ANALYZER__WORKERS=8`), command-line flags.

use clap::Parser;
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config as RawConfig, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::analyzer::AnalyzerConfig;
use crate::core::scheduler::SchedulerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid analyzer configuration: {0}")]
    InvalidAnalyzer(String),

    #[error("Invalid detection configuration: {0}")]
    InvalidDetection(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidProviders(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub analyzer: PipelineConfig,
    pub detection: DetectionConfig,
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration for the given command line
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = defaults()?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix("CATALOG")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }
        if let Some(rules) = &cli_args.rules {
            builder = builder.set_override("detection.rules_file", rules.display().to_string())?;
        }
        if let Some(workers) = cli_args.workers {
            builder = builder.set_override("analyzer.workers", workers as u64)?;
        }
        if let Some(hours) = cli_args.refresh_older_than {
            builder = builder.set_override("analyzer.refresh_max_age", hours)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.analyzer.validate()?;
        self.detection.validate()?;
        self.providers.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(RawConfig::builder()
        .set_default("database.path", "./data/catalog.db")?
        .set_default("database.connection_pool_size", 8)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("analyzer.workers", 4)?
        .set_default("analyzer.queue_capacity", 1000)?
        .set_default("analyzer.analysis_timeout", 300)?
        .set_default("analyzer.provider_timeout", 300)?
        .set_default("analyzer.default_priority", 5)?
        .set_default("analyzer.default_protocol", "smb")?
        .set_default("analyzer.refresh_max_age", 168)?
        .set_default("analyzer.refresh_batch", 100)?
        .set_default("detection.min_confidence", 0.1)?
        .set_default("providers.tmdb_base_url", crate::provider::tmdb::DEFAULT_BASE_URL)?
        .set_default("providers.request_timeout", 30)?
        .set_default(
            "providers.user_agent",
            concat!("catalog-analyzer/", env!("CARGO_PKG_VERSION")),
        )?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "json")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.rotation", "daily")?)
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "catalog-analyzer")]
#[command(about = "Classifies shared-storage directories into a media catalog", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Database file path
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Detection rules file (TOML)
    #[arg(long, value_name = "FILE")]
    pub rules: Option<PathBuf>,

    /// Number of analysis workers
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Share the directories belong to
    #[arg(short, long, value_name = "SHARE", default_value = "default")]
    pub share: String,

    /// Directory to analyze; repeatable
    #[arg(long = "directory", value_name = "PATH")]
    pub directories: Vec<String>,

    /// Priority for the submitted directories
    #[arg(short, long, value_name = "N")]
    pub priority: Option<i32>,

    /// Analyze every directory in the catalog, on every share
    #[arg(long)]
    pub analyze_all: bool,

    /// Re-fetch provider metadata that is missing or stale
    #[arg(long)]
    pub refresh_metadata: bool,

    /// Age in hours after which metadata counts as stale
    #[arg(long, value_name = "HOURS")]
    pub refresh_older_than: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: u32,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase(
                "busy_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout)
    }
}

/// The `[analyzer]` section: scheduler and pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub analysis_timeout: u64, // seconds
    pub provider_timeout: u64, // seconds
    pub default_priority: i32,
    pub default_protocol: String,
    /// Share id -> link protocol
    #[serde(default)]
    pub share_protocols: HashMap<String, String>,
    pub refresh_max_age: u64, // hours
    /// Media items per metadata refresh pass
    pub refresh_batch: usize,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidAnalyzer("workers must be greater than 0".to_string()));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidAnalyzer(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.analysis_timeout == 0 || self.provider_timeout == 0 {
            return Err(ConfigError::InvalidAnalyzer("timeouts must be greater than 0".to_string()));
        }

        if self.default_protocol.is_empty() || self.share_protocols.values().any(|p| p.is_empty()) {
            return Err(ConfigError::InvalidAnalyzer("protocols cannot be empty".to_string()));
        }

        if self.refresh_batch == 0 {
            return Err(ConfigError::InvalidAnalyzer(
                "refresh_batch must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn refresh_max_age(&self) -> Duration {
        Duration::from_secs(self.refresh_max_age.saturating_mul(3600))
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            analysis_timeout: Duration::from_secs(self.analysis_timeout),
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            provider_timeout: Duration::from_secs(self.provider_timeout),
            default_protocol: self.default_protocol.clone(),
            share_protocols: self.share_protocols.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Replaces the built-in rules when set
    pub rules_file: Option<PathBuf>,
    pub min_confidence: f64,
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidDetection(
                "min_confidence must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// TMDB stays registered but disabled without a key
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub request_timeout: u64, // seconds
    pub user_agent: String,
}

impl ProvidersConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.tmdb_base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidProviders(format!(
                "tmdb_base_url must be an http(s) URL, got {}",
                self.tmdb_base_url
            )));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidProviders(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// API key with blank values treated as unset
    pub fn tmdb_api_key(&self) -> Option<String> {
        self.tmdb_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    /// never, hourly or daily
    pub rotation: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        let valid_rotations = ["never", "hourly", "daily"];
        if !valid_rotations.contains(&self.rotation.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "rotation must be one of: {:?}",
                valid_rotations
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
            [analyzer]
            workers = 2
            provider_timeout = 60

            [analyzer.share_protocols]
            media = "nfs"

            [providers]
            tmdb_api_key = "  "
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.analyzer.workers, 2);
        assert_eq!(config.analyzer.queue_capacity, 1000);
        assert_eq!(config.analyzer.default_priority, 5);
        assert_eq!(config.database.connection_pool_size, 8);
        assert_eq!(config.providers.tmdb_api_key(), None);

        let analyzer = config.analyzer.analyzer_config();
        assert_eq!(analyzer.provider_timeout, Duration::from_secs(60));
        assert_eq!(analyzer.share_protocols.get("media").map(String::as_str), Some("nfs"));
        assert_eq!(config.analyzer.scheduler_config().workers, 2);
        assert_eq!(config.analyzer.refresh_batch, 100);
        assert_eq!(config.analyzer.refresh_max_age(), Duration::from_secs(168 * 3600));
    }

    #[test]
    fn test_refresh_flags() {
        let args = CliArgs::parse_from([
            "catalog-analyzer",
            "--analyze-all",
            "--refresh-metadata",
            "--refresh-older-than",
            "24",
        ]);
        assert!(args.analyze_all);
        assert!(args.refresh_metadata);

        let config = Config::load(&args).unwrap();
        assert_eq!(config.analyzer.refresh_max_age(), Duration::from_secs(24 * 3600));

        let file = write_config("[analyzer]\nrefresh_batch = 0\n");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidAnalyzer(_))
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = write_config("[logging]\nlevel = \"warn\"\n");
        let path = file.path().display().to_string();
        let args = CliArgs::parse_from([
            "catalog-analyzer",
            "--config",
            path.as_str(),
            "--log-level",
            "debug",
            "--workers",
            "3",
            "--directory",
            "/movies/Heat (1995)",
            "--directory",
            "/music/Album",
        ]);

        let config = Config::load(&args).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.analyzer.workers, 3);
        assert_eq!(args.share, "default");
        assert_eq!(args.directories.len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/catalog.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_invalid_sections_rejected() {
        let file = write_config("[analyzer]\nworkers = 0\n");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidAnalyzer(_))
        ));

        let file = write_config("[detection]\nmin_confidence = 1.5\n");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidDetection(_))
        ));

        let file = write_config("[logging]\noutput = \"file\"\n");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidLogging(_))
        ));

        let file = write_config("[providers]\ntmdb_base_url = \"ftp://tmdb\"\n");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidProviders(_))
        ));
    }
}
