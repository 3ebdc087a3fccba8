#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `quakewatch`: runs the seismic analytics jobs once or on a schedule.

mod jobs;
mod service;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone as _, Utc};
use clap::{Parser, Subcommand};
use quakewatch_analytics::dates::parse_date;
use quakewatch_analytics_models::ModelFamily;
use quakewatch_config::Config;
use quakewatch_database::{DuckDbStore, paths};
use quakewatch_store::{EventStore as _, ForecastStore as _, SnapshotStore as _, ZoneStore as _};

use crate::jobs::Job;

#[derive(Parser)]
#[command(name = "quakewatch", about = "Seismic event analytics")]
struct Cli {
    /// Configuration file (defaults to `$QUAKEWATCH_CONFIG`, then
    /// `./quakewatch.toml`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// `DuckDB` file (overrides `$QUAKEWATCH_DB_PATH` and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Import USGS `GeoJSON` feed files
    Import {
        /// Feed files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Record a statistics snapshot for the most recent window
    Trend {
        /// Window length in hours
        #[arg(long)]
        window_hours: Option<u32>,
    },
    /// Cluster events into geographic zones
    Cluster {
        /// Number of zones
        #[arg(long, short = 'k')]
        clusters: Option<usize>,
        /// Inclusive start date (YYYY-MM-DD); requires --end-date
        #[arg(long)]
        start_date: Option<String>,
        /// Inclusive end date (YYYY-MM-DD); requires --start-date
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Forecast magnitude, depth and risk
    Forecast {
        /// Days to forecast, starting tomorrow
        #[arg(long)]
        horizon_days: Option<u32>,
        /// Regression model (`RandomForest`, `Linear` or `SVM`)
        #[arg(long)]
        model: Option<ModelFamily>,
        /// Number of recent events to train on
        #[arg(long)]
        history_limit: Option<usize>,
        /// Inclusive start date (YYYY-MM-DD); requires --end-date
        #[arg(long)]
        start_date: Option<String>,
        /// Inclusive end date (YYYY-MM-DD); requires --start-date
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Run trend, cluster and forecast once with configured defaults
    RunAll,
    /// Run every job on its configured schedule until interrupted
    Service,
    /// Print the latest snapshot, zones and forecasts as JSON
    Status,
    /// Delete events
    Purge {
        /// Only delete events that occurred before this date (YYYY-MM-DD)
        #[arg(long)]
        before: Option<String>,
    },
}

fn open_store(
    cli_db: Option<&Path>,
    config: &Config,
) -> Result<DuckDbStore, Box<dyn std::error::Error>> {
    let path = cli_db
        .map(Path::to_path_buf)
        .or_else(|| config.db_path())
        .unwrap_or_else(paths::default_db_path);
    log::debug!("Using database {}", path.display());
    Ok(DuckDbStore::open(&path)?)
}

fn print_json(value: &serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_and_print(job: &Job, store: &DuckDbStore) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = job
        .run(store)
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    print_json(&outcome)
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let store = open_store(cli.db.as_deref(), &config)?;

    match cli.command {
        Commands::Init => {
            let counts = store.table_counts()?;
            log::info!(
                "Database ready ({} events, {} forecasts)",
                counts.events,
                counts.forecasts
            );
        }
        Commands::Import { files } => {
            for file in &files {
                let report = quakewatch_ingest::import_file(file, &store)?;
                println!(
                    "{}: {} features, {} upserted, {} skipped",
                    file.display(),
                    report.features,
                    report.upserted,
                    report.skipped
                );
            }
        }
        Commands::Trend { window_hours } => {
            let mut params = config.trend_params();
            if let Some(hours) = window_hours {
                params.window_hours = hours;
            }
            run_and_print(&Job::Trend(params), &store)?;
        }
        Commands::Cluster {
            clusters,
            start_date,
            end_date,
        } => {
            let mut params = config.cluster_params();
            if let Some(k) = clusters {
                params.clusters = k;
            }
            params.start_date = start_date;
            params.end_date = end_date;
            run_and_print(&Job::Cluster(params), &store)?;
        }
        Commands::Forecast {
            horizon_days,
            model,
            history_limit,
            start_date,
            end_date,
        } => {
            let mut params = config.forecast_params()?;
            if let Some(days) = horizon_days {
                params.horizon_days = days;
            }
            if let Some(model) = model {
                params.model = model;
            }
            if let Some(limit) = history_limit {
                params.history_limit = limit;
            }
            params.start_date = start_date;
            params.end_date = end_date;
            run_and_print(&Job::Forecast(params), &store)?;
        }
        Commands::RunAll => {
            let mut failed = 0;
            for job in Job::all_from_config(&config)? {
                match job.run(&store) {
                    Ok(outcome) => {
                        print_json(&serde_json::json!({ "job": job.name(), "outcome": outcome }))?;
                    }
                    Err(e) => {
                        log::error!("{} failed: {e}", job.name());
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{failed} of 3 jobs failed").into());
            }
        }
        Commands::Service => {
            let (trend, cluster, forecast) = config.schedule.periods()?;
            let [trend_job, cluster_job, forecast_job] = Job::all_from_config(&config)?;
            service::run(
                [
                    (trend_job, trend),
                    (cluster_job, cluster),
                    (forecast_job, forecast),
                ],
                Arc::new(store),
            )
            .await?;
        }
        Commands::Status => {
            let counts = store.table_counts()?;
            print_json(&serde_json::json!({
                "events": counts.events,
                "forecastRows": counts.forecasts,
                "zoneVersion": counts.zone_version,
                "latestSnapshot": store.latest_snapshot()?,
                "zones": store.current_zones()?,
                "latestForecasts": store.latest_forecasts()?,
            }))?;
        }
        Commands::Purge { before } => {
            let cutoff = before
                .as_deref()
                .map(parse_date)
                .transpose()?
                .map(|date| Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)));
            let deleted = store.purge_events(cutoff)?;
            println!("Deleted {deleted} events");
        }
    }

    Ok(())
}
