//! The `events` table: upsert with merge semantics, range queries, zone
//! labels and bulk purge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use duckdb::Connection;
use quakewatch_event_models::{Event, EventQuery};

use crate::DbError;
use crate::schema::{format_timestamp, parse_timestamp, with_transaction};

/// Number of rows per INSERT chunk (`DuckDB` handles large batches well).
const CHUNK_SIZE: usize = 2_000;

/// Number of labels per bulk UPDATE statement.
const LABEL_CHUNK_SIZE: usize = 1_000;

const EVENT_COLUMNS: &str = "id, place, magnitude, depth_km, latitude, longitude,
    CAST(occurred_at AS VARCHAR) AS occurred_at_text, zone_id, mag_type, status,
    tsunami, url, CAST(updated_at AS VARCHAR) AS updated_at_text";

/// Upserts a batch of events in one transaction.
///
/// A republished event overwrites every stored field except `zone_id`,
/// which is only replaced when the incoming event carries one. Duplicate
/// ids inside the batch keep their last occurrence.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; nothing is written.
pub fn upsert_events(conn: &Connection, events: &[Event]) -> Result<u64, DbError> {
    if events.is_empty() {
        return Ok(0);
    }

    // Deduplicate within the batch: keep last occurrence of each id
    let mut last_seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, event) in events.iter().enumerate() {
        last_seen.insert(&event.id, i);
    }
    let deduped: Vec<&Event> = events
        .iter()
        .enumerate()
        .filter(|(i, event)| last_seen.get(event.id.as_str()) == Some(i))
        .map(|(_, event)| event)
        .collect();

    if deduped.len() < events.len() {
        log::info!(
            "Deduplicated upsert batch: {} -> {} rows ({} duplicates removed)",
            events.len(),
            deduped.len(),
            events.len() - deduped.len(),
        );
    }

    with_transaction(conn, |conn| {
        let mut total = 0u64;

        for chunk in deduped.chunks(CHUNK_SIZE) {
            let mut sql = String::from(
                "INSERT INTO events (
                    id, place, magnitude, depth_km, latitude, longitude,
                    occurred_at, zone_id, mag_type, status, tsunami, url, updated_at
                ) VALUES ",
            );

            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(
                    "(?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
                );
            }

            sql.push_str(
                " ON CONFLICT (id) DO UPDATE SET
                    place = EXCLUDED.place,
                    magnitude = EXCLUDED.magnitude,
                    depth_km = EXCLUDED.depth_km,
                    latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude,
                    occurred_at = EXCLUDED.occurred_at,
                    zone_id = COALESCE(EXCLUDED.zone_id, zone_id),
                    mag_type = EXCLUDED.mag_type,
                    status = EXCLUDED.status,
                    tsunami = EXCLUDED.tsunami,
                    url = EXCLUDED.url,
                    updated_at = EXCLUDED.updated_at",
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut param_idx = 1usize;

            for event in chunk {
                stmt.raw_bind_parameter(param_idx, &event.id)?;
                stmt.raw_bind_parameter(param_idx + 1, event.place.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 2, event.magnitude)?;
                stmt.raw_bind_parameter(param_idx + 3, event.depth_km)?;
                stmt.raw_bind_parameter(param_idx + 4, event.latitude)?;
                stmt.raw_bind_parameter(param_idx + 5, event.longitude)?;
                stmt.raw_bind_parameter(
                    param_idx + 6,
                    event.occurred_at.as_ref().map(format_timestamp),
                )?;
                stmt.raw_bind_parameter(param_idx + 7, event.zone_id)?;
                stmt.raw_bind_parameter(param_idx + 8, event.mag_type.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 9, event.status.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 10, event.tsunami)?;
                stmt.raw_bind_parameter(param_idx + 11, event.url.as_deref())?;
                stmt.raw_bind_parameter(
                    param_idx + 12,
                    event.updated_at.as_ref().map(format_timestamp),
                )?;

                param_idx += 13;
            }

            let rows = stmt.raw_execute()?;
            total += u64::try_from(rows).unwrap_or(0);
        }

        Ok(total)
    })
}

/// Returns events matching `query` in ascending `occurred_at` order,
/// events without a time last and ties broken by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn query_events(conn: &Connection, query: &EventQuery) -> Result<Vec<Event>, DbError> {
    let mut filter = String::new();
    let mut params: Vec<String> = Vec::new();

    if let Some(range) = &query.range {
        filter.push_str(
            " WHERE occurred_at >= CAST(? AS TIMESTAMP) AND occurred_at < CAST(? AS TIMESTAMP)",
        );
        params.push(format_timestamp(&range.start));
        params.push(format_timestamp(&range.end));
    }

    let sql = match query.latest {
        Some(n) => format!(
            "SELECT * FROM (
                SELECT {EVENT_COLUMNS}, occurred_at AS sort_at FROM events{filter}
                ORDER BY occurred_at DESC NULLS LAST, id
                LIMIT {n}
            ) ORDER BY sort_at ASC NULLS LAST, id"
        ),
        None => format!(
            "SELECT {EVENT_COLUMNS} FROM events{filter} ORDER BY occurred_at ASC NULLS LAST, id"
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), |row| {
        let occurred_at: Option<String> = row.get(6)?;
        let updated_at: Option<String> = row.get(12)?;

        Ok(Event {
            id: row.get(0)?,
            place: row.get(1)?,
            magnitude: row.get(2)?,
            depth_km: row.get(3)?,
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            occurred_at: occurred_at.as_deref().and_then(parse_timestamp),
            zone_id: row.get(7)?,
            mag_type: row.get(8)?,
            status: row.get(9)?,
            tsunami: row.get(10)?,
            url: row.get(11)?,
            updated_at: updated_at.as_deref().and_then(parse_timestamp),
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }

    Ok(events)
}

/// Attaches a zone label to one event.
///
/// # Errors
///
/// Returns [`DbError::UnknownEvent`] if no event has `id`.
pub fn update_zone(conn: &Connection, id: &str, zone_id: i32) -> Result<(), DbError> {
    let rows = conn.execute(
        "UPDATE events SET zone_id = ? WHERE id = ?",
        duckdb::params![zone_id, id],
    )?;

    if rows == 0 {
        return Err(DbError::UnknownEvent { id: id.to_string() });
    }

    Ok(())
}

/// Attaches zone labels to many events in one transaction.
///
/// Labels are written with a chunked `UPDATE ... FROM (VALUES ...)` rather
/// than row by row. If any id is missing the whole batch is rolled back.
///
/// # Errors
///
/// Returns [`DbError::UnknownEvent`] for the first missing id, or
/// [`DbError`] if a statement fails.
pub fn bulk_update_zones(
    conn: &Connection,
    labels: &BTreeMap<String, i32>,
) -> Result<u64, DbError> {
    if labels.is_empty() {
        return Ok(0);
    }
    with_transaction(conn, |conn| write_labels(conn, labels))
}

/// Writes zone labels without opening a transaction; the caller owns it.
///
/// # Errors
///
/// Returns [`DbError::UnknownEvent`] for the first missing id, or
/// [`DbError`] if a statement fails.
pub(crate) fn write_labels(
    conn: &Connection,
    labels: &BTreeMap<String, i32>,
) -> Result<u64, DbError> {
    let entries: Vec<(&String, &i32)> = labels.iter().collect();
    let mut total = 0u64;

    for chunk in entries.chunks(LABEL_CHUNK_SIZE) {
        let placeholders = chunk
            .iter()
            .map(|_| "(CAST(? AS VARCHAR), CAST(? AS INTEGER))")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE events SET zone_id = labels.zone_id
             FROM (VALUES {placeholders}) AS labels(id, zone_id)
             WHERE events.id = labels.id"
        );

        let mut stmt = conn.prepare(&sql)?;
        for (i, (id, zone_id)) in chunk.iter().enumerate() {
            stmt.raw_bind_parameter(i * 2 + 1, id.as_str())?;
            stmt.raw_bind_parameter(i * 2 + 2, **zone_id)?;
        }

        let rows = stmt.raw_execute()?;
        total += u64::try_from(rows).unwrap_or(0);

        if rows < chunk.len() {
            let missing = first_missing_id(conn, chunk.iter().map(|(id, _)| id.as_str()))?;
            return Err(DbError::UnknownEvent {
                id: missing.unwrap_or_default(),
            });
        }
    }

    Ok(total)
}

fn first_missing_id<'a>(
    conn: &Connection,
    ids: impl Iterator<Item = &'a str>,
) -> Result<Option<String>, DbError> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM events WHERE id = ?")?;
    for id in ids {
        let count: i64 = stmt.query_row([id], |row| row.get(0))?;
        if count == 0 {
            return Ok(Some(id.to_string()));
        }
    }
    Ok(None)
}

/// Deletes events, optionally only those occurring before `before`.
///
/// Events without a time are only removed by a full purge.
///
/// # Errors
///
/// Returns [`DbError`] if the delete fails.
pub fn purge_events(conn: &Connection, before: Option<DateTime<Utc>>) -> Result<u64, DbError> {
    let rows = match before {
        Some(cutoff) => conn.execute(
            "DELETE FROM events WHERE occurred_at < CAST(? AS TIMESTAMP)",
            [format_timestamp(&cutoff)],
        )?,
        None => conn.execute("DELETE FROM events", [])?,
    };

    Ok(u64::try_from(rows).unwrap_or(0))
}

/// Returns the number of stored events.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_event_count(conn: &Connection) -> Result<u64, DbError> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM events")?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    crate::schema::to_count("event count", count)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use quakewatch_event_models::TimeRange;

    use super::*;
    use crate::schema::open_in_memory;

    fn event(id: &str, day: u32, magnitude: f64) -> Event {
        let mut event = Event::new(id);
        event.occurred_at = Some(Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap());
        event.magnitude = Some(magnitude);
        event.latitude = Some(35.0);
        event.longitude = Some(139.0);
        event.place = Some("10 km E of Tokyo, Japan".to_string());
        event
    }

    #[test]
    fn upsert_then_query_in_time_order() {
        let conn = open_in_memory().unwrap();
        let mut undated = Event::new("undated");
        undated.magnitude = Some(1.0);

        upsert_events(
            &conn,
            &[event("b", 3, 4.0), undated, event("a", 1, 2.5)],
        )
        .unwrap();

        let events = query_events(&conn, &EventQuery::all()).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "undated"]);
        assert_eq!(events[0].occurred_at, event("a", 1, 2.5).occurred_at);
        assert_eq!(events[0].place.as_deref(), Some("10 km E of Tokyo, Japan"));
    }

    #[test]
    fn republished_event_keeps_zone_label() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[event("a", 1, 2.5)]).unwrap();
        update_zone(&conn, "a", 2).unwrap();

        upsert_events(&conn, &[event("a", 1, 2.9)]).unwrap();

        let events = query_events(&conn, &EventQuery::all()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].zone_id, Some(2));
        assert_eq!(events[0].magnitude, Some(2.9));
    }

    #[test]
    fn duplicate_ids_in_batch_keep_last() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[event("a", 1, 2.5), event("a", 1, 3.5)]).unwrap();

        let events = query_events(&conn, &EventQuery::all()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].magnitude, Some(3.5));
    }

    #[test]
    fn range_query_is_half_open() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[event("a", 1, 2.0), event("b", 2, 3.0), event("c", 3, 4.0)])
            .unwrap();

        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap(),
        );
        let events = query_events(&conn, &EventQuery::in_range(range)).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn latest_query_returns_newest_ascending() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[event("a", 1, 2.0), event("b", 2, 3.0), event("c", 3, 4.0)])
            .unwrap();

        let events = query_events(&conn, &EventQuery::latest(2)).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn bulk_update_rolls_back_on_unknown_id() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[event("a", 1, 2.0), event("b", 2, 3.0)]).unwrap();

        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), 1);
        labels.insert("zz".to_string(), 0);

        let err = bulk_update_zones(&conn, &labels).unwrap_err();
        assert!(matches!(err, DbError::UnknownEvent { ref id } if id == "zz"));
        let events = query_events(&conn, &EventQuery::all()).unwrap();
        assert!(events.iter().all(|e| e.zone_id.is_none()));

        labels.remove("zz");
        labels.insert("b".to_string(), 0);
        assert_eq!(bulk_update_zones(&conn, &labels).unwrap(), 2);
        let events = query_events(&conn, &EventQuery::all()).unwrap();
        assert_eq!(events[0].zone_id, Some(1));
        assert_eq!(events[1].zone_id, Some(0));
    }

    #[test]
    fn purge_before_keeps_recent_events() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[event("a", 1, 2.0), event("b", 5, 3.0)]).unwrap();

        let cutoff = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
        assert_eq!(purge_events(&conn, Some(cutoff)).unwrap(), 1);
        assert_eq!(get_event_count(&conn).unwrap(), 1);
        assert_eq!(purge_events(&conn, None).unwrap(), 1);
        assert_eq!(get_event_count(&conn).unwrap(), 0);
    }
}
