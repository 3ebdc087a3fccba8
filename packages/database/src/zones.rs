//! The versioned `zones` table.
//!
//! A clustering run writes its zones under version `v + 1`, flips
//! `_meta.current_zone_version` and deletes older versions, all inside one
//! transaction. Readers resolve the pointer first, so they only ever see one
//! complete zone set.

use std::collections::BTreeMap;

use duckdb::Connection;
use quakewatch_event_models::Zone;
use quakewatch_store::ClusteringCommit;

use crate::DbError;
use crate::events::write_labels;
use crate::schema::{
    CURRENT_ZONE_VERSION_KEY, current_zone_version, format_timestamp, from_count, parse_enum,
    require_timestamp, set_meta, to_count, with_transaction,
};

/// Writes `zones` as the new current zone set and returns its version.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the previous set stays
/// current.
pub fn replace_zones(conn: &Connection, zones: &[Zone]) -> Result<u64, DbError> {
    with_transaction(conn, |conn| write_zone_set(conn, zones))
}

/// Labels events and swaps in `zones` in a single transaction. Either both
/// the labels and the new zone set are committed, or neither is.
///
/// # Errors
///
/// Returns [`DbError`] if any label or zone write fails; events keep their
/// previous labels and the previous set stays current.
pub fn apply_clustering(
    conn: &Connection,
    labels: &BTreeMap<String, i32>,
    zones: &[Zone],
) -> Result<ClusteringCommit, DbError> {
    with_transaction(conn, |conn| {
        let labelled = write_labels(conn, labels)?;
        let version = write_zone_set(conn, zones)?;
        Ok(ClusteringCommit { labelled, version })
    })
}

fn write_zone_set(conn: &Connection, zones: &[Zone]) -> Result<u64, DbError> {
    let version = current_zone_version(conn)? + 1;
    let version_param = from_count(version);

    let mut stmt = conn.prepare(
        "INSERT INTO zones (
            version, zone_id, name, centroid_lat, centroid_lon,
            risk_level, event_count, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
    )?;

    for zone in zones {
        stmt.execute(duckdb::params![
            version_param,
            zone.zone_id,
            zone.name,
            zone.centroid_lat,
            zone.centroid_lon,
            zone.risk_level.as_ref(),
            from_count(zone.event_count),
            format_timestamp(&zone.updated_at),
        ])?;
    }

    set_meta(conn, CURRENT_ZONE_VERSION_KEY, &version.to_string())?;
    let removed = conn.execute("DELETE FROM zones WHERE version <> ?", [version_param])?;

    log::debug!(
        "Zone set version {version} written ({} zones, {removed} stale rows removed)",
        zones.len()
    );

    Ok(version)
}

/// Returns the current zone set ordered by `zone_id`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored value is corrupt.
pub fn current_zones(conn: &Connection) -> Result<Vec<Zone>, DbError> {
    let version = current_zone_version(conn)?;

    let mut stmt = conn.prepare(
        "SELECT zone_id, name, centroid_lat, centroid_lon, risk_level, event_count,
                CAST(updated_at AS VARCHAR)
         FROM zones
         WHERE version = ?
         ORDER BY zone_id",
    )?;

    let rows = stmt.query_map([from_count(version)], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut zones = Vec::new();
    for row in rows {
        let (zone_id, name, centroid_lat, centroid_lon, risk_level, event_count, updated_at) =
            row?;
        zones.push(Zone {
            zone_id,
            name,
            centroid_lat,
            centroid_lon,
            risk_level: parse_enum("risk_level", &risk_level)?,
            event_count: to_count("event_count", event_count)?,
            updated_at: require_timestamp("updated_at", &updated_at)?,
        });
    }

    Ok(zones)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use quakewatch_event_models::{Event, EventQuery, RiskLevel};

    use super::*;
    use crate::events::{query_events, upsert_events};
    use crate::schema::open_in_memory;

    fn zone(zone_id: i32, name: &str) -> Zone {
        Zone {
            zone_id,
            name: name.to_string(),
            centroid_lat: 35.5,
            centroid_lon: 139.25,
            risk_level: RiskLevel::High,
            event_count: 7,
            updated_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn swap_replaces_previous_set_entirely() {
        let conn = open_in_memory().unwrap();
        assert!(current_zones(&conn).unwrap().is_empty());

        assert_eq!(
            replace_zones(&conn, &[zone(0, "Asia"), zone(1, "Europe"), zone(2, "Africa")])
                .unwrap(),
            1
        );
        assert_eq!(
            replace_zones(&conn, &[zone(1, "East Asia"), zone(0, "Oceania")]).unwrap(),
            2
        );

        let zones = current_zones(&conn).unwrap();
        assert_eq!(zones, vec![zone(0, "Oceania"), zone(1, "East Asia")]);

        let stored: i64 = conn
            .query_row("SELECT COUNT(*) FROM zones", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, 2);
    }

    #[test]
    fn failed_swap_keeps_current_set() {
        let conn = open_in_memory().unwrap();
        replace_zones(&conn, &[zone(0, "Asia")]).unwrap();

        // Duplicate primary key inside one version aborts the swap.
        assert!(replace_zones(&conn, &[zone(3, "Europe"), zone(3, "Africa")]).is_err());

        assert_eq!(current_zone_version(&conn).unwrap(), 1);
        assert_eq!(current_zones(&conn).unwrap(), vec![zone(0, "Asia")]);
    }

    #[test]
    fn clustering_commits_labels_with_zones() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[Event::new("a"), Event::new("b")]).unwrap();

        let labels = BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 1)]);
        let commit =
            apply_clustering(&conn, &labels, &[zone(0, "Asia"), zone(1, "Europe")]).unwrap();

        assert_eq!(commit, ClusteringCommit { labelled: 2, version: 1 });
        let events = query_events(&conn, &EventQuery::all()).unwrap();
        assert_eq!(events[0].zone_id, Some(0));
        assert_eq!(events[1].zone_id, Some(1));
    }

    #[test]
    fn failed_zone_write_rolls_back_labels() {
        let conn = open_in_memory().unwrap();
        upsert_events(&conn, &[Event::new("a"), Event::new("b")]).unwrap();
        replace_zones(&conn, &[zone(0, "Asia")]).unwrap();

        let labels = BTreeMap::from([("a".to_string(), 3), ("b".to_string(), 3)]);
        assert!(apply_clustering(&conn, &labels, &[zone(3, "Europe"), zone(3, "Africa")]).is_err());

        let events = query_events(&conn, &EventQuery::all()).unwrap();
        assert!(events.iter().all(|e| e.zone_id.is_none()));
        assert_eq!(current_zone_version(&conn).unwrap(), 1);
        assert_eq!(current_zones(&conn).unwrap(), vec![zone(0, "Asia")]);
    }
}
