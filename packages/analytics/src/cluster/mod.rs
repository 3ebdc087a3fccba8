//! Geographic zoning of events.

pub mod kmeans;

use std::collections::BTreeMap;

use chrono::Utc;
use quakewatch_analytics_models::{ClusterParams, ClusterReport};
use quakewatch_event_models::{EventQuery, RiskLevel, Zone};
use quakewatch_geography::regions::zone_name;
use quakewatch_store::{EventStore, ZoneStore};

use crate::AnalyticsError;
use crate::dates::{describe_range, resolve_range};
use kmeans::{KMeansConfig, Point};

/// Partitions events into `K` zones, labels every clustered event with its
/// zone and swaps in the new zone set.
pub struct GeoClusterer<'a> {
    events: &'a dyn EventStore,
    zones: &'a dyn ZoneStore,
}

impl<'a> GeoClusterer<'a> {
    #[must_use]
    pub const fn new(events: &'a dyn EventStore, zones: &'a dyn ZoneStore) -> Self {
        Self { events, zones }
    }

    /// Runs one clustering pass.
    ///
    /// Events without both coordinates are skipped. The label update and
    /// the zone swap are committed together or not at all.
    ///
    /// # Errors
    ///
    /// * [`AnalyticsError::InvalidParameter`] for a zero `K`, restart or
    ///   iteration count, or a bad date range
    /// * [`AnalyticsError::InsufficientData`] if fewer than `K` events have
    ///   coordinates; nothing is written
    /// * [`AnalyticsError::Store`] if a read or write fails
    pub fn run(&self, params: &ClusterParams) -> Result<ClusterReport, AnalyticsError> {
        validate(params)?;
        let range = resolve_range(params.start_date.as_deref(), params.end_date.as_deref())?;
        let time_range = describe_range(params.start_date.as_deref(), params.end_date.as_deref());

        let query = range.map_or_else(EventQuery::all, EventQuery::in_range);
        let events = self.events.query_events(&query)?;

        let mut ids = Vec::with_capacity(events.len());
        let mut points: Vec<Point> = Vec::with_capacity(events.len());
        for event in &events {
            if let (Some(lat), Some(lon)) = (event.latitude, event.longitude) {
                ids.push(event.id.as_str());
                points.push([lat, lon]);
            }
        }

        let skipped = events.len() - points.len();
        if skipped > 0 {
            log::warn!("Skipping {skipped} events without coordinates");
        }

        let config = KMeansConfig {
            k: params.clusters,
            restarts: params.restarts,
            max_iterations: params.max_iterations,
            tolerance: params.tolerance,
            seed: params.seed,
        };

        let Some(fit) = kmeans::fit(&points, &config) else {
            return Err(AnalyticsError::InsufficientData {
                required: params.clusters,
                actual: points.len(),
            });
        };

        let labels: BTreeMap<String, i32> = ids
            .iter()
            .zip(&fit.labels)
            .map(|(id, &label)| Ok(((*id).to_string(), zone_index(label)?)))
            .collect::<Result<_, AnalyticsError>>()?;

        let zones = build_zones(&fit.centroids, &fit.counts())?;
        let commit = self.zones.apply_clustering(&labels, &zones)?;
        let zone_version = commit.version;
        log::info!("Labelled {} events with their zone", commit.labelled);

        log::info!(
            "Clustered {} events into {} zones (version {zone_version}, {time_range})",
            points.len(),
            zones.len()
        );

        Ok(ClusterReport {
            clusters: params.clusters,
            total_events: points.len() as u64,
            skipped_events: skipped as u64,
            zone_version,
            time_range,
            zones,
        })
    }
}

fn validate(params: &ClusterParams) -> Result<(), AnalyticsError> {
    let invalid = |message: &str| {
        Err(AnalyticsError::InvalidParameter {
            message: message.to_string(),
        })
    };

    if params.clusters == 0 {
        return invalid("clusters must be at least 1");
    }
    if params.restarts == 0 {
        return invalid("restarts must be at least 1");
    }
    if params.max_iterations == 0 {
        return invalid("max_iterations must be at least 1");
    }
    if !params.tolerance.is_finite() || params.tolerance < 0.0 {
        return invalid("tolerance must be a non-negative number");
    }
    Ok(())
}

fn zone_index(label: usize) -> Result<i32, AnalyticsError> {
    i32::try_from(label).map_err(|_| AnalyticsError::InvalidParameter {
        message: format!("cluster index {label} does not fit a zone id"),
    })
}

/// `High` when a zone has strictly more members than the mean per-zone
/// count, `Medium` otherwise. `Low` is never produced.
#[must_use]
pub fn risk_level(members: u64, total: u64, clusters: usize) -> RiskLevel {
    // members > total / K, compared without division.
    if u128::from(members) * clusters as u128 > u128::from(total) {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    }
}

fn build_zones(centroids: &[Point], counts: &[u64]) -> Result<Vec<Zone>, AnalyticsError> {
    let total: u64 = counts.iter().sum();
    let updated_at = Utc::now();

    centroids
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(index, (&[lat, lon], &members))| {
            Ok(Zone {
                zone_id: zone_index(index)?,
                name: zone_name(lat, lon),
                centroid_lat: lat,
                centroid_lon: lon,
                risk_level: risk_level(members, total, centroids.len()),
                event_count: members,
                updated_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use quakewatch_event_models::Event;
    use quakewatch_store::memory::MemoryStore;
    use quakewatch_store::{ClusteringCommit, StoreError};

    use super::*;

    /// Zone sink whose writes always fail.
    struct ReadOnlyZones;

    impl ZoneStore for ReadOnlyZones {
        fn apply_clustering(
            &self,
            _: &BTreeMap<String, i32>,
            _: &[Zone],
        ) -> Result<ClusteringCommit, StoreError> {
            Err(StoreError::Backend {
                message: "read-only".to_string(),
            })
        }

        fn replace_zones(&self, _: &[Zone]) -> Result<u64, StoreError> {
            Err(StoreError::Backend {
                message: "read-only".to_string(),
            })
        }

        fn current_zones(&self) -> Result<Vec<Zone>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn located(id: &str, lat: f64, lon: f64) -> Event {
        let mut event = Event::new(id);
        event.latitude = Some(lat);
        event.longitude = Some(lon);
        event.magnitude = Some(4.0);
        event.occurred_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        event
    }

    #[test]
    fn risk_level_uses_strict_mean_comparison() {
        assert_eq!(risk_level(3, 9, 3), RiskLevel::Medium);
        assert_eq!(risk_level(4, 9, 3), RiskLevel::High);
        assert_eq!(risk_level(1, 9, 3), RiskLevel::Medium);
    }

    #[test]
    fn too_few_located_events_leave_store_untouched() {
        let mut events = vec![located("a", 1.0, 1.0), located("b", 2.0, 2.0)];
        events.push(Event::new("c"));
        let store = MemoryStore::with_events(&events).unwrap();

        let err = GeoClusterer::new(&store, &store)
            .run(&ClusterParams {
                clusters: 3,
                ..ClusterParams::default()
            })
            .unwrap_err();

        assert!(matches!(
            err,
            AnalyticsError::InsufficientData {
                required: 3,
                actual: 2
            }
        ));
        assert!(store.current_zones().unwrap().is_empty());
        assert_eq!(store.zone_version().unwrap(), 0);
    }

    #[test]
    fn zero_clusters_is_rejected() {
        let store = MemoryStore::new();
        let err = GeoClusterer::new(&store, &store)
            .run(&ClusterParams {
                clusters: 0,
                ..ClusterParams::default()
            })
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidParameter { .. }));
    }

    #[test]
    fn skipped_events_keep_their_label() {
        let mut unlocated = Event::new("z");
        unlocated.zone_id = Some(7);
        let events = vec![
            located("a", 35.0, 139.0),
            located("b", 35.5, 139.5),
            located("c", -33.0, -70.0),
            unlocated,
        ];
        let store = MemoryStore::with_events(&events).unwrap();

        let report = GeoClusterer::new(&store, &store)
            .run(&ClusterParams {
                clusters: 2,
                ..ClusterParams::default()
            })
            .unwrap();

        assert_eq!(report.total_events, 3);
        assert_eq!(report.skipped_events, 1);
        assert_eq!(report.time_range, "all_data");

        let stored = store.query_events(&EventQuery::all()).unwrap();
        let zone_of = |id: &str| stored.iter().find(|e| e.id == id).unwrap().zone_id;
        assert_eq!(zone_of("z"), Some(7));
        assert_eq!(zone_of("a"), zone_of("b"));
        assert_ne!(zone_of("a"), zone_of("c"));
    }

    #[test]
    fn rerun_replaces_zone_set() {
        let events: Vec<Event> = (0..6)
            .map(|i| located(&format!("e{i}"), f64::from(i) * 10.0, 0.0))
            .collect();
        let store = MemoryStore::with_events(&events).unwrap();
        let clusterer = GeoClusterer::new(&store, &store);

        let first = clusterer
            .run(&ClusterParams {
                clusters: 3,
                ..ClusterParams::default()
            })
            .unwrap();
        let second = clusterer
            .run(&ClusterParams {
                clusters: 2,
                ..ClusterParams::default()
            })
            .unwrap();

        assert_eq!(second.zone_version, first.zone_version + 1);
        assert_eq!(store.current_zones().unwrap().len(), 2);
    }

    #[test]
    fn failed_zone_write_leaves_events_unlabelled() {
        let events: Vec<Event> = (0..6)
            .map(|i| located(&format!("e{i}"), f64::from(i) * 10.0, 0.0))
            .collect();
        let store = MemoryStore::with_events(&events).unwrap();

        let err = GeoClusterer::new(&store, &ReadOnlyZones)
            .run(&ClusterParams {
                clusters: 3,
                ..ClusterParams::default()
            })
            .unwrap_err();

        assert!(matches!(err, AnalyticsError::Store(_)));
        let stored = store.query_events(&EventQuery::all()).unwrap();
        assert!(stored.iter().all(|e| e.zone_id.is_none()));
    }
}
