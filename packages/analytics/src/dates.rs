//! Date-range parsing for custom-range runs.

use chrono::{Days, NaiveDate, NaiveDateTime, TimeZone as _, Utc};
use quakewatch_event_models::TimeRange;

use crate::AnalyticsError;

/// Parses a `YYYY-MM-DD` date (a full `YYYY-MM-DDTHH:MM:SS` timestamp is
/// accepted and truncated to its date).
///
/// # Errors
///
/// Returns [`AnalyticsError::InvalidParameter`] if `s` is not a date.
pub fn parse_date(s: &str) -> Result<NaiveDate, AnalyticsError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.date());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| AnalyticsError::InvalidParameter {
        message: format!("Invalid date '{s}': {e}. Expected format: YYYY-MM-DD"),
    })
}

/// Resolves an optional inclusive `(start_date, end_date)` pair into the
/// half-open range `[start 00:00, end + 1 day 00:00)` UTC.
///
/// Returns `None` when neither date is given.
///
/// # Errors
///
/// Returns [`AnalyticsError::InvalidParameter`] if only one date is given,
/// either date is malformed, or `start > end`.
pub fn resolve_range(
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<Option<TimeRange>, AnalyticsError> {
    let (start, end) = match (start_date, end_date) {
        (None, None) => return Ok(None),
        (Some(start), Some(end)) => (parse_date(start)?, parse_date(end)?),
        _ => {
            return Err(AnalyticsError::InvalidParameter {
                message: "start_date and end_date must be given together".to_string(),
            });
        }
    };

    if start > end {
        return Err(AnalyticsError::InvalidParameter {
            message: format!("start_date {start} is after end_date {end}"),
        });
    }

    let end_exclusive = end
        .checked_add_days(Days::new(1))
        .ok_or_else(|| AnalyticsError::InvalidParameter {
            message: format!("end_date {end} is out of range"),
        })?;

    Ok(Some(TimeRange::new(
        Utc.from_utc_datetime(&start.and_time(chrono::NaiveTime::MIN)),
        Utc.from_utc_datetime(&end_exclusive.and_time(chrono::NaiveTime::MIN)),
    )))
}

/// Human-readable description of an optional range, as reported by the
/// clustering job.
#[must_use]
pub fn describe_range(start_date: Option<&str>, end_date: Option<&str>) -> String {
    match (start_date, end_date) {
        (Some(start), Some(end)) => format!("{start} to {end}"),
        _ => "all_data".to_string(),
    }
}
