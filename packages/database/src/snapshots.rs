//! The append-only `stat_snapshots` table.

use duckdb::Connection;
use quakewatch_event_models::{MagnitudeHistogram, StatSnapshot};

use crate::DbError;
use crate::schema::{format_timestamp, from_count, parse_enum, require_timestamp, to_count};

/// Appends one snapshot.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn append_snapshot(conn: &Connection, snapshot: &StatSnapshot) -> Result<(), DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO stat_snapshots (
            captured_at, window_start, window_end, event_count,
            avg_magnitude, max_magnitude, min_magnitude, avg_depth, max_depth,
            strongest_event_id,
            hist_below_3, hist_3_to_4, hist_4_to_5, hist_5_to_6, hist_at_least_6,
            trend_direction, trend_percent, activity_label, pressure_label
        ) VALUES (
            CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?,
            ?, ?, ?, ?, ?,
            ?,
            ?, ?, ?, ?, ?,
            ?, ?, ?, ?
        )",
    )?;

    let [below_3, from_3_to_4, from_4_to_5, from_5_to_6, at_least_6] =
        snapshot.magnitude_histogram.counts().map(from_count);

    stmt.execute(duckdb::params![
        format_timestamp(&snapshot.captured_at),
        format_timestamp(&snapshot.window_start),
        format_timestamp(&snapshot.window_end),
        from_count(snapshot.event_count),
        snapshot.avg_magnitude,
        snapshot.max_magnitude,
        snapshot.min_magnitude,
        snapshot.avg_depth,
        snapshot.max_depth,
        snapshot.strongest_event_id.as_deref(),
        below_3,
        from_3_to_4,
        from_4_to_5,
        from_5_to_6,
        at_least_6,
        snapshot.trend_direction.as_ref(),
        snapshot.trend_percent,
        snapshot.activity_label.as_ref(),
        snapshot.pressure_label.as_ref(),
    ])?;

    Ok(())
}

/// Raw column values of one `stat_snapshots` row before enum/timestamp
/// conversion.
struct SnapshotRow {
    captured_at: String,
    window_start: String,
    window_end: String,
    event_count: i64,
    avg_magnitude: Option<f64>,
    max_magnitude: Option<f64>,
    min_magnitude: Option<f64>,
    avg_depth: Option<f64>,
    max_depth: Option<f64>,
    strongest_event_id: Option<String>,
    histogram: [i64; MagnitudeHistogram::BUCKETS],
    trend_direction: String,
    trend_percent: f64,
    activity_label: String,
    pressure_label: String,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<StatSnapshot, DbError> {
        let mut counts = [0u64; MagnitudeHistogram::BUCKETS];
        for (slot, value) in counts.iter_mut().zip(self.histogram) {
            *slot = to_count("histogram bucket", value)?;
        }

        Ok(StatSnapshot {
            captured_at: require_timestamp("captured_at", &self.captured_at)?,
            window_start: require_timestamp("window_start", &self.window_start)?,
            window_end: require_timestamp("window_end", &self.window_end)?,
            event_count: to_count("event_count", self.event_count)?,
            avg_magnitude: self.avg_magnitude,
            max_magnitude: self.max_magnitude,
            min_magnitude: self.min_magnitude,
            avg_depth: self.avg_depth,
            max_depth: self.max_depth,
            strongest_event_id: self.strongest_event_id,
            magnitude_histogram: MagnitudeHistogram::from_counts(counts),
            trend_direction: parse_enum("trend_direction", &self.trend_direction)?,
            trend_percent: self.trend_percent,
            activity_label: parse_enum("activity_label", &self.activity_label)?,
            pressure_label: parse_enum("pressure_label", &self.pressure_label)?,
        })
    }
}

/// Returns the snapshot with the greatest `captured_at` (latest insert on
/// ties).
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored value is corrupt.
pub fn latest_snapshot(conn: &Connection) -> Result<Option<StatSnapshot>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT
            CAST(captured_at AS VARCHAR), CAST(window_start AS VARCHAR),
            CAST(window_end AS VARCHAR), event_count,
            avg_magnitude, max_magnitude, min_magnitude, avg_depth, max_depth,
            strongest_event_id,
            hist_below_3, hist_3_to_4, hist_4_to_5, hist_5_to_6, hist_at_least_6,
            trend_direction, trend_percent, activity_label, pressure_label
         FROM stat_snapshots
         ORDER BY captured_at DESC, id DESC
         LIMIT 1",
    )?;

    let result = stmt.query_row([], |row| {
        Ok(SnapshotRow {
            captured_at: row.get(0)?,
            window_start: row.get(1)?,
            window_end: row.get(2)?,
            event_count: row.get(3)?,
            avg_magnitude: row.get(4)?,
            max_magnitude: row.get(5)?,
            min_magnitude: row.get(6)?,
            avg_depth: row.get(7)?,
            max_depth: row.get(8)?,
            strongest_event_id: row.get(9)?,
            histogram: [
                row.get(10)?,
                row.get(11)?,
                row.get(12)?,
                row.get(13)?,
                row.get(14)?,
            ],
            trend_direction: row.get(15)?,
            trend_percent: row.get(16)?,
            activity_label: row.get(17)?,
            pressure_label: row.get(18)?,
        })
    });

    match result {
        Ok(row) => row.into_snapshot().map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use quakewatch_event_models::{ActivityLabel, PressureLabel, TrendDirection};

    use super::*;
    use crate::schema::open_in_memory;

    fn snapshot(hour: u32, event_count: u64) -> StatSnapshot {
        StatSnapshot {
            captured_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            window_start: Utc.with_ymd_and_hms(2024, 5, 31, hour, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            event_count,
            avg_magnitude: Some(3.2),
            max_magnitude: Some(5.1),
            min_magnitude: Some(1.4),
            avg_depth: Some(12.5),
            max_depth: Some(80.0),
            strongest_event_id: Some("us7000abcd".to_string()),
            magnitude_histogram: MagnitudeHistogram::from_counts([4, 3, 2, 1, 0]),
            trend_direction: TrendDirection::Increasing,
            trend_percent: 12.5,
            activity_label: ActivityLabel::MildIncrease,
            pressure_label: PressureLabel::Medium,
        }
    }

    #[test]
    fn empty_table_has_no_latest_snapshot() {
        let conn = open_in_memory().unwrap();
        assert!(latest_snapshot(&conn).unwrap().is_none());
    }

    #[test]
    fn latest_snapshot_is_newest_by_capture_time() {
        let conn = open_in_memory().unwrap();
        append_snapshot(&conn, &snapshot(9, 10)).unwrap();
        append_snapshot(&conn, &snapshot(3, 99)).unwrap();

        let latest = latest_snapshot(&conn).unwrap().unwrap();
        assert_eq!(latest, snapshot(9, 10));
    }
}
