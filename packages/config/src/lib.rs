#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runtime configuration.
//!
//! Settings come from an optional `quakewatch.toml`. The file is looked up
//! at `$QUAKEWATCH_CONFIG`, then `./quakewatch.toml`; when neither exists
//! the built-in defaults apply. Every field is optional. The database path
//! can additionally be overridden with `$QUAKEWATCH_DB_PATH`.

use std::path::{Path, PathBuf};
use std::str::FromStr as _;
use std::time::Duration;

use quakewatch_analytics_models::{
    ClusterParams, DEFAULT_CLUSTERS, DEFAULT_HISTORY_LIMIT, DEFAULT_MIN_TRAINING_ROWS,
    DEFAULT_SEED, DEFAULT_WINDOW_HOURS, ForecastParams, ModelFamily, TrendParams,
};
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "QUAKEWATCH_CONFIG";

/// Environment variable overriding the database path.
pub const DB_PATH_ENV: &str = "QUAKEWATCH_DB_PATH";

/// Configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "quakewatch.toml";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not acceptable.
    #[error("Invalid value for {field}: {message}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

// ── Sections ────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub trend: TrendConfig,
    pub cluster: ClusterConfig,
    pub forecast: ForecastConfig,
    pub schedule: ScheduleConfig,
}

/// `[database]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// `DuckDB` file. `None` means the default under `data/`.
    pub path: Option<PathBuf>,
}

/// `[trend]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrendConfig {
    pub window_hours: u32,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_hours: DEFAULT_WINDOW_HOURS,
        }
    }
}

/// `[cluster]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub clusters: usize,
    pub restarts: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            restarts: 10,
            max_iterations: 300,
            seed: DEFAULT_SEED,
        }
    }
}

/// `[forecast]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastConfig {
    pub history_limit: usize,
    pub min_training_rows: usize,
    pub horizon_days: u32,
    /// Model family name, matched case-insensitively.
    pub model: String,
    pub trees: usize,
    pub seed: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            min_training_rows: DEFAULT_MIN_TRAINING_ROWS,
            horizon_days: 1,
            model: ModelFamily::default().to_string(),
            trees: 100,
            seed: DEFAULT_SEED,
        }
    }
}

/// `[schedule]`: seconds between runs of each job in service mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub trend_secs: u64,
    pub cluster_secs: u64,
    pub forecast_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            trend_secs: 300,
            cluster_secs: 86_400,
            forecast_secs: 300,
        }
    }
}

impl ScheduleConfig {
    /// Periods as `(trend, cluster, forecast)`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if any period is zero.
    pub fn periods(&self) -> Result<(Duration, Duration, Duration), ConfigError> {
        let period = |field, secs: u64| {
            if secs == 0 {
                Err(ConfigError::Invalid {
                    field,
                    message: "must be at least 1 second".to_string(),
                })
            } else {
                Ok(Duration::from_secs(secs))
            }
        };

        Ok((
            period("schedule.trend_secs", self.trend_secs)?,
            period("schedule.cluster_secs", self.cluster_secs)?,
            period("schedule.forecast_secs", self.forecast_secs)?,
        ))
    }
}

// ── Loading ─────────────────────────────────────────────────────────────

impl Config {
    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown keys.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads configuration from `explicit`, `$QUAKEWATCH_CONFIG` or
    /// `./quakewatch.toml`, in that order, falling back to defaults. An
    /// explicitly named file (argument or environment) must exist.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a named file is missing or malformed.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        if let Some(path) = named {
            log::debug!("Loading configuration from {}", path.display());
            return Self::from_file(&path);
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            log::debug!("Loading configuration from ./{DEFAULT_CONFIG_FILE}");
            return Self::from_file(local);
        }

        log::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Database path: `$QUAKEWATCH_DB_PATH`, else `[database] path`, else
    /// `None` for the built-in default.
    #[must_use]
    pub fn db_path(&self) -> Option<PathBuf> {
        resolve_db_path(std::env::var_os(DB_PATH_ENV), self.database.path.as_deref())
    }

    #[must_use]
    pub const fn trend_params(&self) -> TrendParams {
        TrendParams {
            window_hours: self.trend.window_hours,
            end: None,
        }
    }

    #[must_use]
    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            clusters: self.cluster.clusters,
            restarts: self.cluster.restarts,
            max_iterations: self.cluster.max_iterations,
            seed: self.cluster.seed,
            ..ClusterParams::default()
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown model family.
    pub fn forecast_params(&self) -> Result<ForecastParams, ConfigError> {
        let model =
            ModelFamily::from_str(&self.forecast.model).map_err(|_| ConfigError::Invalid {
                field: "forecast.model",
                message: format!(
                    "unknown model family '{}' (expected RandomForest, Linear or SVM)",
                    self.forecast.model
                ),
            })?;

        Ok(ForecastParams {
            history_limit: self.forecast.history_limit,
            min_training_rows: self.forecast.min_training_rows,
            horizon_days: self.forecast.horizon_days,
            model,
            trees: self.forecast.trees,
            seed: self.forecast.seed,
            start_date: None,
            end_date: None,
        })
    }
}

fn resolve_db_path(env: Option<std::ffi::OsString>, configured: Option<&Path>) -> Option<PathBuf> {
    env.filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| configured.map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.trend_params().window_hours, 24);
        assert_eq!(config.cluster_params(), ClusterParams::default());
        assert_eq!(config.forecast_params().unwrap(), ForecastParams::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [cluster]
            clusters = 8

            [forecast]
            model = "svm"
            horizon_days = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster.clusters, 8);
        assert_eq!(config.cluster.restarts, 10);

        let forecast = config.forecast_params().unwrap();
        assert_eq!(forecast.model, ModelFamily::Svm);
        assert_eq!(forecast.horizon_days, 3);
        assert_eq!(forecast.history_limit, 2000);
    }

    #[test]
    fn unknown_keys_and_models_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("[trend]\nwindow = 3\n"),
            Err(ConfigError::Parse(_))
        ));

        let config = Config::from_toml_str("[forecast]\nmodel = \"xgboost\"\n").unwrap();
        assert!(matches!(
            config.forecast_params(),
            Err(ConfigError::Invalid {
                field: "forecast.model",
                ..
            })
        ));
    }

    #[test]
    fn environment_path_wins_over_file() {
        let configured = Path::new("/srv/quakes.duckdb");
        assert_eq!(
            resolve_db_path(Some("/tmp/override.duckdb".into()), Some(configured)),
            Some(PathBuf::from("/tmp/override.duckdb"))
        );
        assert_eq!(
            resolve_db_path(Some("".into()), Some(configured)),
            Some(configured.to_path_buf())
        );
        assert_eq!(resolve_db_path(None, None), None);
    }

    #[test]
    fn zero_period_is_invalid() {
        let schedule = ScheduleConfig {
            trend_secs: 0,
            ..ScheduleConfig::default()
        };
        assert!(schedule.periods().is_err());
        assert_eq!(
            ScheduleConfig::default().periods().unwrap().1,
            Duration::from_secs(86_400)
        );
    }
}
