//! In-memory implementation of every store trait.
//!
//! Behaves like the `DuckDB` store (ordering, merge semantics, atomic
//! batches, versioned zone swap) without touching disk.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use quakewatch_event_models::{Event, EventQuery, Forecast, StatSnapshot, Zone};

use crate::{
    ClusteringCommit, EventStore, ForecastStore, SnapshotStore, StoreError, ZoneStore,
};

#[derive(Default)]
struct State {
    events: BTreeMap<String, Event>,
    snapshots: Vec<StatSnapshot>,
    zone_versions: BTreeMap<u64, Vec<Zone>>,
    current_zone_version: u64,
    forecasts: Vec<Forecast>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with `events`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lock is poisoned.
    pub fn with_events(events: &[Event]) -> Result<Self, StoreError> {
        let store = Self::new();
        store.upsert_events(events)?;
        Ok(store)
    }

    /// Every snapshot appended so far, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lock is poisoned.
    pub fn snapshots(&self) -> Result<Vec<StatSnapshot>, StoreError> {
        Ok(self.read()?.snapshots.clone())
    }

    /// Every forecast appended so far, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lock is poisoned.
    pub fn forecasts(&self) -> Result<Vec<Forecast>, StoreError> {
        Ok(self.read()?.forecasts.clone())
    }

    /// The version number of the current zone set (0 before any swap).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lock is poisoned.
    pub fn zone_version(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.current_zone_version)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|e| StoreError::Backend {
            message: format!("memory store lock poisoned: {e}"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|e| StoreError::Backend {
            message: format!("memory store lock poisoned: {e}"),
        })
    }
}

impl State {
    fn check_labels(&self, labels: &BTreeMap<String, i32>) -> Result<(), StoreError> {
        match labels.keys().find(|id| !self.events.contains_key(*id)) {
            Some(missing) => Err(StoreError::UnknownEvent {
                id: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    fn write_labels(&mut self, labels: &BTreeMap<String, i32>) -> u64 {
        for (id, zone_id) in labels {
            if let Some(event) = self.events.get_mut(id) {
                event.zone_id = Some(*zone_id);
            }
        }
        labels.len() as u64
    }

    fn swap_zones(&mut self, zones: &[Zone]) -> u64 {
        let version = self.current_zone_version + 1;

        let mut sorted = zones.to_vec();
        sorted.sort_by_key(|zone| zone.zone_id);

        self.zone_versions.insert(version, sorted);
        self.current_zone_version = version;
        self.zone_versions.retain(|v, _| *v == version);
        version
    }
}

/// Zone ids must be unique within one set, as in the `zones` table key.
fn check_zone_ids(zones: &[Zone]) -> Result<(), StoreError> {
    let mut seen = std::collections::BTreeSet::new();
    match zones.iter().find(|zone| !seen.insert(zone.zone_id)) {
        Some(zone) => Err(StoreError::Backend {
            message: format!("duplicate zone id {}", zone.zone_id),
        }),
        None => Ok(()),
    }
}

/// Ascending by `occurred_at` with missing times last, then by id.
fn chronological(a: &Event, b: &Event) -> Ordering {
    match (a.occurred_at, b.occurred_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

impl EventStore for MemoryStore {
    fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let state = self.read()?;

        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|event| {
                query.range.is_none_or(|range| {
                    event.occurred_at.is_some_and(|at| range.contains(at))
                })
            })
            .cloned()
            .collect();

        if let Some(n) = query.latest {
            events.sort_by(|a, b| match (a.occurred_at, b.occurred_at) {
                (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.id.cmp(&b.id)),
                _ => chronological(a, b),
            });
            events.truncate(n);
        }

        events.sort_by(chronological);
        Ok(events)
    }

    fn upsert_events(&self, events: &[Event]) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let mut written = 0u64;

        for event in events {
            let mut merged = event.clone();
            if merged.zone_id.is_none() {
                merged.zone_id = state.events.get(&event.id).and_then(|e| e.zone_id);
            }
            state.events.insert(event.id.clone(), merged);
            written += 1;
        }

        Ok(written)
    }

    fn update_zone(&self, id: &str, zone_id: i32) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let event = state
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownEvent { id: id.to_string() })?;
        event.zone_id = Some(zone_id);
        Ok(())
    }

    fn bulk_update_zones(&self, labels: &BTreeMap<String, i32>) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        state.check_labels(labels)?;
        Ok(state.write_labels(labels))
    }

    fn purge_events(&self, before: Option<DateTime<Utc>>) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let count_before = state.events.len();

        match before {
            Some(cutoff) => state
                .events
                .retain(|_, event| event.occurred_at.is_none_or(|at| at >= cutoff)),
            None => state.events.clear(),
        }

        Ok((count_before - state.events.len()) as u64)
    }
}

impl SnapshotStore for MemoryStore {
    fn append_snapshot(&self, snapshot: &StatSnapshot) -> Result<(), StoreError> {
        self.write()?.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn latest_snapshot(&self) -> Result<Option<StatSnapshot>, StoreError> {
        let state = self.read()?;
        // `max_by_key` keeps the last maximum, so equal timestamps resolve to
        // the most recently appended snapshot.
        Ok(state
            .snapshots
            .iter()
            .max_by_key(|snapshot| snapshot.captured_at)
            .cloned())
    }
}

impl ZoneStore for MemoryStore {
    fn apply_clustering(
        &self,
        labels: &BTreeMap<String, i32>,
        zones: &[Zone],
    ) -> Result<ClusteringCommit, StoreError> {
        let mut state = self.write()?;
        state.check_labels(labels)?;
        check_zone_ids(zones)?;

        let labelled = state.write_labels(labels);
        let version = state.swap_zones(zones);
        Ok(ClusteringCommit { labelled, version })
    }

    fn replace_zones(&self, zones: &[Zone]) -> Result<u64, StoreError> {
        check_zone_ids(zones)?;
        Ok(self.write()?.swap_zones(zones))
    }

    fn current_zones(&self) -> Result<Vec<Zone>, StoreError> {
        let state = self.read()?;
        Ok(state
            .zone_versions
            .get(&state.current_zone_version)
            .cloned()
            .unwrap_or_default())
    }
}

impl ForecastStore for MemoryStore {
    fn append_forecasts(&self, forecasts: &[Forecast]) -> Result<(), StoreError> {
        self.write()?.forecasts.extend_from_slice(forecasts);
        Ok(())
    }

    fn latest_forecasts(&self) -> Result<Vec<Forecast>, StoreError> {
        let state = self.read()?;
        let mut latest: BTreeMap<_, &Forecast> = BTreeMap::new();

        for forecast in &state.forecasts {
            let Some(metric) = forecast.metric else {
                continue;
            };
            match latest.get(&metric) {
                Some(current) if current.created_at > forecast.created_at => {}
                _ => {
                    latest.insert(metric, forecast);
                }
            }
        }

        Ok(latest.into_values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone as _};
    use quakewatch_event_models::{ForecastKind, ForecastMetric, RiskLevel};

    use super::*;

    fn event(id: &str, hour: u32) -> Event {
        let mut event = Event::new(id);
        event.occurred_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap());
        event.magnitude = Some(4.0);
        event
    }

    fn zone(zone_id: i32) -> Zone {
        Zone {
            zone_id,
            name: format!("zone {zone_id}"),
            centroid_lat: 0.0,
            centroid_lon: 0.0,
            risk_level: RiskLevel::Medium,
            event_count: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn query_latest_returns_most_recent_in_ascending_order() {
        let store =
            MemoryStore::with_events(&[event("a", 1), event("b", 3), event("c", 2)]).unwrap();

        let ids: Vec<String> = store
            .query_events(&EventQuery::latest(2))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();

        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn upsert_keeps_existing_zone_label() {
        let store = MemoryStore::with_events(&[event("a", 1)]).unwrap();
        store.update_zone("a", 3).unwrap();

        let mut corrected = event("a", 1);
        corrected.magnitude = Some(5.1);
        store.upsert_events(&[corrected]).unwrap();

        let stored = store.query_events(&EventQuery::all()).unwrap();
        assert_eq!(stored[0].zone_id, Some(3));
        assert_eq!(stored[0].magnitude, Some(5.1));
    }

    #[test]
    fn bulk_update_is_all_or_nothing() {
        let store = MemoryStore::with_events(&[event("a", 1), event("b", 2)]).unwrap();

        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), 0);
        labels.insert("missing".to_string(), 1);

        assert!(matches!(
            store.bulk_update_zones(&labels),
            Err(StoreError::UnknownEvent { .. })
        ));
        let stored = store.query_events(&EventQuery::all()).unwrap();
        assert!(stored.iter().all(|e| e.zone_id.is_none()));
    }

    #[test]
    fn zone_swap_replaces_whole_set() {
        let store = MemoryStore::new();
        store.replace_zones(&[zone(0), zone(1), zone(2)]).unwrap();
        let version = store.replace_zones(&[zone(1), zone(0)]).unwrap();

        assert_eq!(version, 2);
        let ids: Vec<i32> = store
            .current_zones()
            .unwrap()
            .iter()
            .map(|z| z.zone_id)
            .collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn failed_clustering_commit_changes_nothing() {
        let store = MemoryStore::with_events(&[event("a", 1), event("b", 2)]).unwrap();
        store.replace_zones(&[zone(0)]).unwrap();

        let labels = BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 1)]);
        assert!(store.apply_clustering(&labels, &[zone(1), zone(1)]).is_err());

        let stored = store.query_events(&EventQuery::all()).unwrap();
        assert!(stored.iter().all(|e| e.zone_id.is_none()));
        assert_eq!(store.zone_version().unwrap(), 1);

        let commit = store.apply_clustering(&labels, &[zone(1)]).unwrap();
        assert_eq!(commit, ClusteringCommit { labelled: 2, version: 2 });
        let stored = store.query_events(&EventQuery::all()).unwrap();
        assert!(stored.iter().all(|e| e.zone_id == Some(1)));
    }

    #[test]
    fn latest_forecasts_picks_newest_per_metric() {
        let store = MemoryStore::new();
        let older = Forecast {
            kind: ForecastKind::Regression,
            metric: Some(ForecastMetric::Magnitude),
            value: Some(4.0),
            label: None,
            confidence: 0.8,
            target_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            model_name: "RandomForest_Magnitude".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        };
        let newer = Forecast {
            value: Some(4.5),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap(),
            ..older.clone()
        };
        store.append_forecasts(&[newer, older]).unwrap();

        let latest = store.latest_forecasts().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, Some(4.5));
    }

    #[test]
    fn purge_before_cutoff_keeps_later_events() {
        let store = MemoryStore::with_events(&[event("a", 1), event("b", 5)]).unwrap();
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();

        assert_eq!(store.purge_events(Some(cutoff)).unwrap(), 1);
        assert_eq!(store.query_events(&EventQuery::all()).unwrap().len(), 1);
    }
}
