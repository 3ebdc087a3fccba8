//! The append-only `forecasts` table.

use duckdb::Connection;
use quakewatch_event_models::Forecast;

use crate::DbError;
use crate::schema::{
    DATE_FORMAT, format_timestamp, parse_date, parse_enum, require_timestamp, with_transaction,
};

/// Appends a batch of forecasts in one transaction.
///
/// # Errors
///
/// Returns [`DbError`] if any insert fails; nothing is written.
pub fn append_forecasts(conn: &Connection, forecasts: &[Forecast]) -> Result<(), DbError> {
    if forecasts.is_empty() {
        return Ok(());
    }

    with_transaction(conn, |conn| {
        let mut stmt = conn.prepare(
            "INSERT INTO forecasts (
                kind, metric, value, label, confidence, target_date, model_name, created_at
            ) VALUES (?, ?, ?, ?, ?, CAST(? AS DATE), ?, CAST(? AS TIMESTAMP))",
        )?;

        for forecast in forecasts {
            stmt.execute(duckdb::params![
                forecast.kind.as_ref(),
                forecast.metric.as_ref().map(AsRef::<str>::as_ref),
                forecast.value,
                forecast.label.as_deref(),
                forecast.confidence,
                forecast.target_date.format(DATE_FORMAT).to_string(),
                forecast.model_name,
                format_timestamp(&forecast.created_at),
            ])?;
        }

        Ok(())
    })
}

/// Returns the latest forecast (by `created_at`, then insertion order) for
/// each metric, ordered by metric.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored value is corrupt.
pub fn latest_forecasts(conn: &Connection) -> Result<Vec<Forecast>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT kind, metric, value, label, confidence,
                CAST(target_date AS VARCHAR), model_name, CAST(created_at AS VARCHAR)
         FROM forecasts
         WHERE metric IS NOT NULL
         QUALIFY ROW_NUMBER() OVER (
             PARTITION BY metric ORDER BY created_at DESC, id DESC
         ) = 1",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut forecasts = Vec::new();
    for row in rows {
        let (kind, metric, value, label, confidence, target_date, model_name, created_at) = row?;
        forecasts.push(Forecast {
            kind: parse_enum("kind", &kind)?,
            metric: metric
                .as_deref()
                .map(|m| parse_enum("metric", m))
                .transpose()?,
            value,
            label,
            confidence,
            target_date: parse_date("target_date", &target_date)?,
            model_name,
            created_at: require_timestamp("created_at", &created_at)?,
        });
    }

    forecasts.sort_by_key(|f| f.metric);
    Ok(forecasts)
}

/// Returns the number of stored forecast rows.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_forecast_count(conn: &Connection) -> Result<u64, DbError> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM forecasts")?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    crate::schema::to_count("forecast count", count)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone as _, Utc};
    use quakewatch_event_models::{ForecastKind, ForecastMetric};

    use super::*;
    use crate::schema::open_in_memory;

    fn forecast(metric: ForecastMetric, value: f64, hour: u32) -> Forecast {
        Forecast {
            kind: ForecastKind::Regression,
            metric: Some(metric),
            value: Some(value),
            label: None,
            confidence: 0.8,
            target_date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            model_name: format!("RandomForest_{metric}"),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn latest_per_metric_in_metric_order() {
        let conn = open_in_memory().unwrap();
        let mut risk = forecast(ForecastMetric::Risk, 0.0, 5);
        risk.kind = ForecastKind::Classification;
        risk.value = None;
        risk.label = Some("Moderate".to_string());

        append_forecasts(
            &conn,
            &[
                forecast(ForecastMetric::Depth, 10.0, 1),
                forecast(ForecastMetric::Magnitude, 4.1, 1),
                forecast(ForecastMetric::Depth, 12.0, 5),
                forecast(ForecastMetric::Magnitude, 4.4, 5),
                risk.clone(),
            ],
        )
        .unwrap();

        let latest = latest_forecasts(&conn).unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0], forecast(ForecastMetric::Magnitude, 4.4, 5));
        assert_eq!(latest[1], forecast(ForecastMetric::Depth, 12.0, 5));
        assert_eq!(latest[2], risk);
        assert_eq!(get_forecast_count(&conn).unwrap(), 5);
    }
}
