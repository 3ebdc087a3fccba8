//! The three analytics jobs behind one dispatch point, shared by the
//! one-shot commands, `run-all` and the scheduler.

use quakewatch_analytics::cluster::GeoClusterer;
use quakewatch_analytics::forecast::Forecaster;
use quakewatch_analytics::trend::TrendAnalyzer;
use quakewatch_analytics_models::{ClusterParams, ForecastParams, TrendParams};
use quakewatch_config::{Config, ConfigError};
use quakewatch_store::AnalyticsStore;

/// Error type of a job run. `Send + Sync` so scheduled runs can report
/// across `spawn_blocking`.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// A fully parameterized job.
#[derive(Debug, Clone)]
pub enum Job {
    Trend(TrendParams),
    Cluster(ClusterParams),
    Forecast(ForecastParams),
}

impl Job {
    /// All three jobs with their configured parameters, in dependency order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the forecast model is unknown.
    pub fn all_from_config(config: &Config) -> Result<[Self; 3], ConfigError> {
        Ok([
            Self::Trend(config.trend_params()),
            Self::Cluster(config.cluster_params()),
            Self::Forecast(config.forecast_params()?),
        ])
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Trend(_) => "trend",
            Self::Cluster(_) => "cluster",
            Self::Forecast(_) => "forecast",
        }
    }

    /// Runs the job and returns its outcome as JSON.
    ///
    /// # Errors
    ///
    /// Returns the job's error, or a serialization error.
    pub fn run<S: AnalyticsStore>(&self, store: &S) -> Result<serde_json::Value, JobError> {
        let value = match self {
            Self::Trend(params) => {
                serde_json::to_value(TrendAnalyzer::new(store, store).run(params)?)?
            }
            Self::Cluster(params) => {
                serde_json::to_value(GeoClusterer::new(store, store).run(params)?)?
            }
            Self::Forecast(params) => {
                serde_json::to_value(Forecaster::new(store, store, store).run(params)?)?
            }
        };
        Ok(value)
    }
}
