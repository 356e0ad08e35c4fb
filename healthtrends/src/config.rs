//! Configuration management for HealthTrends
//!
//! Values are resolved from (highest precedence first):
//! 1. `healthtrends.yaml`
//! 2. `HEALTHTRENDS_*` environment variables
//! 3. Built-in defaults

use crate::common::env_loader::EnvLoader;
use crate::metrics::KNOWN_METRICS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILENAME: &str = "healthtrends.yaml";
const ENV_PREFIX: &str = "HEALTHTRENDS";
const MAX_FORECAST_DAYS: u32 = 365;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        /// Path to the configuration file that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content from a configuration file
    #[error("Invalid YAML syntax in {path}:\n{source}\n\nHint: Check for proper indentation and YAML formatting")]
    YamlParse {
        /// Path to the configuration file with invalid YAML content
        path: PathBuf,
        /// Underlying YAML parsing error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value for a specific field
    #[error("Invalid configuration value for '{field}': {value}\n{hint}")]
    InvalidValue {
        /// Name of the configuration field
        field: String,
        /// The rejected value
        value: String,
        /// How to fix it
        hint: String,
    },
}

/// Tunables for the trend processor, caches and comparative engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the worker pool (default: 2)
    pub worker_count: usize,
    /// How long the dispatcher waits for a task before sweeping (default: 1000ms)
    pub poll_interval_ms: u64,
    /// Age after which a computed trend is stale, both for the disk tier and the sweep (default: 24)
    pub cache_expiry_hours: u64,
    /// Memory tier TTL (default: 3600, one hour)
    pub memory_cache_ttl_secs: u64,
    /// How long `get_trend(wait = true)` blocks (default: 30)
    pub wait_timeout_secs: u64,
    /// How long shutdown waits for running workers (default: 5)
    pub shutdown_timeout_secs: u64,
    /// Fewer raw points than this means "insufficient data" (default: 7)
    pub min_data_points: usize,
    /// History fetched for each trend computation (default: 365)
    pub analysis_lookback_days: i64,
    /// Forecast horizon (default: 30)
    pub forecast_days: u32,
    /// Minimum gap between sweep re-queues of the same metric (default: 300)
    pub stale_retry_secs: u64,
    /// Capacity of the historical comparison memo (default: 128)
    pub historical_memo_capacity: usize,
    /// Differential privacy epsilon (default: 1.0)
    pub dp_epsilon: f64,
    /// Differential privacy sensitivity (default: 1.0)
    pub dp_sensitivity: f64,
    /// Directory for the on-disk trend cache
    pub cache_dir: PathBuf,
    /// Metrics accepted by the processor
    pub known_metrics: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval_ms: 1000,
            cache_expiry_hours: 24,
            memory_cache_ttl_secs: 3600,
            wait_timeout_secs: 30,
            shutdown_timeout_secs: 5,
            min_data_points: 7,
            analysis_lookback_days: 365,
            forecast_days: 30,
            stale_retry_secs: 300,
            historical_memo_capacity: 128,
            dp_epsilon: 1.0,
            dp_sensitivity: 1.0,
            cache_dir: Self::default_cache_dir(),
            known_metrics: KNOWN_METRICS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl Config {
    /// Create a configuration with YAML, environment and default layers applied
    pub fn new() -> Self {
        let mut config = Self::default();

        config.apply_env_vars();

        match YamlConfig::load_or_default() {
            Ok(yaml_config) => yaml_config.apply_to_config(&mut config),
            Err(e) => {
                tracing::warn!(
                    "Failed to load YAML configuration, falling back to env vars and defaults: {}",
                    e
                );
            }
        }

        if let Err(e) = config.validate() {
            tracing::warn!("Invalid configuration ({}), using defaults", e);
            return Self::default();
        }

        config
    }

    /// Default on-disk cache location
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("healthtrends")
            .join("trends")
    }

    fn apply_env_vars(&mut self) {
        let loader = EnvLoader::new(ENV_PREFIX);

        self.worker_count = loader.load_parsed("WORKER_COUNT", self.worker_count);
        self.poll_interval_ms = loader.load_parsed("POLL_INTERVAL_MS", self.poll_interval_ms);
        self.cache_expiry_hours = loader.load_parsed("CACHE_EXPIRY_HOURS", self.cache_expiry_hours);
        self.memory_cache_ttl_secs =
            loader.load_parsed("MEMORY_CACHE_TTL_SECS", self.memory_cache_ttl_secs);
        self.wait_timeout_secs = loader.load_parsed("WAIT_TIMEOUT_SECS", self.wait_timeout_secs);
        self.shutdown_timeout_secs =
            loader.load_parsed("SHUTDOWN_TIMEOUT_SECS", self.shutdown_timeout_secs);
        self.min_data_points = loader.load_parsed("MIN_DATA_POINTS", self.min_data_points);
        self.analysis_lookback_days =
            loader.load_parsed("ANALYSIS_LOOKBACK_DAYS", self.analysis_lookback_days);
        self.forecast_days = loader.load_parsed("FORECAST_DAYS", self.forecast_days);
        self.stale_retry_secs = loader.load_parsed("STALE_RETRY_SECS", self.stale_retry_secs);
        self.historical_memo_capacity =
            loader.load_parsed("HISTORICAL_MEMO_CAPACITY", self.historical_memo_capacity);
        self.dp_epsilon = loader.load_parsed("DP_EPSILON", self.dp_epsilon);
        self.dp_sensitivity = loader.load_parsed("DP_SENSITIVITY", self.dp_sensitivity);
        if let Some(dir) = loader.load_optional::<PathBuf>("CACHE_DIR") {
            self.cache_dir = dir;
        }
        if let Some(metrics) = loader.load_list("KNOWN_METRICS") {
            self.known_metrics = metrics;
        }
    }

    /// Dispatcher polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Staleness window shared by the disk tier and the sweep
    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expiry_hours * 3600)
    }

    /// Memory tier TTL
    pub fn memory_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_cache_ttl_secs)
    }

    /// Bound on `get_trend(wait = true)`
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Bound on joining workers at shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Minimum gap between sweep re-queues of one metric
    pub fn stale_retry(&self) -> Duration {
        Duration::from_secs(self.stale_retry_secs)
    }

    /// Whether `metric` is on the processor's allow-list
    pub fn is_known_metric(&self, metric: &str) -> bool {
        self.known_metrics.iter().any(|m| m == metric)
    }

    /// Validate the current configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, value: impl ToString, hint: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                hint: hint.to_string(),
            }
        }

        if self.worker_count == 0 {
            return Err(invalid("worker_count", self.worker_count, "worker_count must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", self.poll_interval_ms, "poll_interval_ms must be positive"));
        }
        if self.cache_expiry_hours == 0 {
            return Err(invalid("cache_expiry_hours", self.cache_expiry_hours, "cache_expiry_hours must be positive"));
        }
        if self.wait_timeout_secs == 0 {
            return Err(invalid("wait_timeout_secs", self.wait_timeout_secs, "wait_timeout_secs must be positive"));
        }
        if self.min_data_points < 2 {
            return Err(invalid(
                "min_data_points",
                self.min_data_points,
                "a trend needs at least 2 data points",
            ));
        }
        if self.analysis_lookback_days < 1 {
            return Err(invalid(
                "analysis_lookback_days",
                self.analysis_lookback_days,
                "analysis_lookback_days must be positive",
            ));
        }
        if self.forecast_days == 0 || self.forecast_days > MAX_FORECAST_DAYS {
            return Err(invalid(
                "forecast_days",
                self.forecast_days,
                "forecast_days must be between 1 and 365",
            ));
        }
        if !(self.dp_epsilon > 0.0) || !(self.dp_sensitivity > 0.0) {
            return Err(invalid(
                "dp_epsilon/dp_sensitivity",
                format!("{}/{}", self.dp_epsilon, self.dp_sensitivity),
                "differential privacy parameters must be positive",
            ));
        }
        if self.known_metrics.is_empty() {
            return Err(invalid("known_metrics", "[]", "at least one metric must be allowed"));
        }

        Ok(())
    }

    /// Find the healthtrends.yaml configuration file
    ///
    /// Search order:
    /// 1. Current working directory
    /// 2. `~/.config/healthtrends/`
    /// 3. Home directory root
    pub fn find_yaml_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(CONFIG_FILENAME)];

        if let Some(home_dir) = dirs::home_dir() {
            search_paths.push(home_dir.join(".config").join("healthtrends").join(CONFIG_FILENAME));
            search_paths.push(home_dir.join(CONFIG_FILENAME));
        }

        let found = search_paths.into_iter().find(|p| p.is_file());
        match &found {
            Some(path) => tracing::debug!("Found configuration file: {:?}", path),
            None => tracing::debug!("No {} found in any search location", CONFIG_FILENAME),
        }
        found
    }

    /// Example YAML configuration file content
    pub fn example_yaml_config() -> &'static str {
        r#"# healthtrends.yaml
worker_count: 2
cache_expiry_hours: 24
memory_cache_ttl_secs: 3600
forecast_days: 30
known_metrics:
  - steps
  - heart_rate
  - sleep_hours
"#
    }
}

/// Configuration loaded from healthtrends.yaml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    /// Worker pool size
    pub worker_count: Option<usize>,
    /// Dispatcher polling interval
    pub poll_interval_ms: Option<u64>,
    /// Disk tier / sweep staleness window
    pub cache_expiry_hours: Option<u64>,
    /// Memory tier TTL
    pub memory_cache_ttl_secs: Option<u64>,
    /// Wait bound for blocking trend reads
    pub wait_timeout_secs: Option<u64>,
    /// Worker join bound at shutdown
    pub shutdown_timeout_secs: Option<u64>,
    /// Insufficient-data threshold
    pub min_data_points: Option<usize>,
    /// History fetched per computation
    pub analysis_lookback_days: Option<i64>,
    /// Forecast horizon
    pub forecast_days: Option<u32>,
    /// Sweep re-queue spacing
    pub stale_retry_secs: Option<u64>,
    /// Historical memo capacity
    pub historical_memo_capacity: Option<usize>,
    /// Differential privacy epsilon
    pub dp_epsilon: Option<f64>,
    /// Differential privacy sensitivity
    pub dp_sensitivity: Option<f64>,
    /// On-disk cache directory
    pub cache_dir: Option<PathBuf>,
    /// Metric allow-list
    pub known_metrics: Option<Vec<String>>,
}

impl YamlConfig {
    /// Apply YAML values to an existing Config; YAML takes precedence
    pub fn apply_to_config(&self, config: &mut Config) {
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = &self.$field {
                    config.$field = value.clone();
                })*
            };
        }
        apply!(
            worker_count,
            poll_interval_ms,
            cache_expiry_hours,
            memory_cache_ttl_secs,
            wait_timeout_secs,
            shutdown_timeout_secs,
            min_data_points,
            analysis_lookback_days,
            forecast_days,
            stale_retry_secs,
            historical_memo_capacity,
            dp_epsilon,
            dp_sensitivity,
            cache_dir,
            known_metrics,
        );
    }

    /// Load YAML configuration from a file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading YAML configuration from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Try to load YAML configuration, returning default if no file exists
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Config::find_yaml_config_file() {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.cache_expiry(), Duration::from_secs(24 * 3600));
        assert_eq!(config.wait_timeout(), Duration::from_secs(30));
        assert_eq!(config.min_data_points, 7);
        assert_eq!(config.forecast_days, 30);
        assert_eq!(config.historical_memo_capacity, 128);
        assert!(config.is_known_metric("steps"));
        assert!(!config.is_known_metric("bad metric!@#"));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_with_env_vars() {
        env::set_var("HEALTHTRENDS_WORKER_COUNT", "4");
        env::set_var("HEALTHTRENDS_KNOWN_METRICS", "steps,heart_rate");
        env::set_var("HEALTHTRENDS_CACHE_DIR", "/tmp/healthtrends-env-test");

        let mut config = Config::default();
        config.apply_env_vars();

        assert_eq!(config.worker_count, 4);
        assert_eq!(config.known_metrics, vec!["steps", "heart_rate"]);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/healthtrends-env-test"));

        env::remove_var("HEALTHTRENDS_WORKER_COUNT");
        env::remove_var("HEALTHTRENDS_KNOWN_METRICS");
        env::remove_var("HEALTHTRENDS_CACHE_DIR");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            worker_count: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "worker_count"
        ));

        let config = Config {
            forecast_days: 400,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            dp_epsilon: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            known_metrics: Vec::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_config_load_and_apply() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, Config::example_yaml_config()).unwrap();

        let yaml = YamlConfig::load_from_file(&path).unwrap();
        let mut config = Config {
            worker_count: 8,
            ..Config::default()
        };
        yaml.apply_to_config(&mut config);

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.known_metrics, vec!["steps", "heart_rate", "sleep_hours"]);
        // Untouched fields keep their previous values
        assert_eq!(config.min_data_points, 7);
    }

    #[test]
    fn test_yaml_config_load_errors() {
        let temp_dir = TempDir::new().unwrap();

        let missing = YamlConfig::load_from_file(temp_dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::FileRead { .. })));

        let bad_path = temp_dir.path().join("bad.yaml");
        std::fs::write(&bad_path, "worker_count: [unclosed").unwrap();
        assert!(matches!(
            YamlConfig::load_from_file(&bad_path),
            Err(ConfigError::YamlParse { .. })
        ));

        let empty_path = temp_dir.path().join("empty.yaml");
        std::fs::write(&empty_path, "   \n").unwrap();
        assert!(YamlConfig::load_from_file(&empty_path)
            .unwrap()
            .worker_count
            .is_none());
    }
}
