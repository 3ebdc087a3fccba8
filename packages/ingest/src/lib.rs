#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Import of USGS `GeoJSON` summary feeds into an [`EventStore`].
//!
//! A feed is a `FeatureCollection` whose features carry the event id at the
//! top level, a `Point` geometry of `[longitude, latitude, depth_km]` and
//! properties such as `place`, `mag`, `magType`, `time` and `updated`
//! (epoch milliseconds). Every parsed event is upserted by id: a
//! republished correction overwrites the stored fields but never clears a
//! zone label.

use std::path::Path;

use chrono::{DateTime, Utc};
use geojson::feature::Id;
use geojson::{Feature, GeoJson, JsonValue};
use quakewatch_event_models::Event;
use quakewatch_store::{EventStore, StoreError};
use thiserror::Error;

/// Errors that can occur while importing a feed.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The feed file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The document is not valid `GeoJSON`.
    #[error("Invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The document is valid `GeoJSON` but not a `FeatureCollection`.
    #[error("Expected a FeatureCollection, found a {found}")]
    NotAFeatureCollection {
        /// What the document was instead.
        found: &'static str,
    },

    /// Writing to the event store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of parsing one feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    /// Events in feed order.
    pub events: Vec<Event>,
    /// Features without an id.
    pub skipped: usize,
}

/// Outcome of importing one feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Features in the feed.
    pub features: usize,
    /// Features skipped for lacking an id.
    pub skipped: usize,
    /// Rows inserted or updated.
    pub upserted: u64,
}

/// Parses a USGS feed document.
///
/// # Errors
///
/// Returns [`IngestError::GeoJson`] for malformed input or
/// [`IngestError::NotAFeatureCollection`] for any other `GeoJSON` object.
pub fn parse_feed(json: &str) -> Result<ParsedFeed, IngestError> {
    let collection = match json.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection,
        GeoJson::Feature(_) => return Err(IngestError::NotAFeatureCollection { found: "Feature" }),
        GeoJson::Geometry(_) => {
            return Err(IngestError::NotAFeatureCollection { found: "Geometry" });
        }
    };

    let mut parsed = ParsedFeed::default();
    for feature in &collection.features {
        match parse_feature(feature) {
            Some(event) => parsed.events.push(event),
            None => parsed.skipped += 1,
        }
    }

    if parsed.skipped > 0 {
        log::warn!("Skipped {} features without an id", parsed.skipped);
    }
    Ok(parsed)
}

/// Converts one feature; `None` when it has no id.
#[must_use]
pub fn parse_feature(feature: &Feature) -> Option<Event> {
    let id = match feature.id.as_ref()? {
        Id::String(s) if !s.is_empty() => s.clone(),
        Id::String(_) => return None,
        Id::Number(n) => n.to_string(),
    };

    let mut event = Event::new(id);
    event.place = string_property(feature, "place");
    event.magnitude = number_property(feature, "mag");
    event.mag_type = string_property(feature, "magType");
    event.status = string_property(feature, "status");
    event.url = string_property(feature, "url");
    event.occurred_at = millis_property(feature, "time");
    event.updated_at = millis_property(feature, "updated");
    event.tsunami = feature.property("tsunami").and_then(|v| match v {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    });

    if let Some(geojson::Value::Point(position)) = feature.geometry.as_ref().map(|g| &g.value) {
        event.longitude = position.first().copied().filter(|v| v.is_finite());
        event.latitude = position.get(1).copied().filter(|v| v.is_finite());
        event.depth_km = position.get(2).copied().filter(|v| v.is_finite());
    }

    Some(event)
}

fn string_property(feature: &Feature, key: &str) -> Option<String> {
    feature
        .property(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number_property(feature: &Feature, key: &str) -> Option<f64> {
    feature
        .property(key)
        .and_then(JsonValue::as_f64)
        .filter(|v| v.is_finite())
}

fn millis_property(feature: &Feature, key: &str) -> Option<DateTime<Utc>> {
    feature
        .property(key)
        .and_then(JsonValue::as_i64)
        .and_then(DateTime::from_timestamp_millis)
}

/// Parses `json` and upserts every event into `store`.
///
/// # Errors
///
/// Returns an [`IngestError`] if parsing or the upsert fails. The upsert is
/// atomic, so a failure writes nothing.
pub fn import_str(json: &str, store: &dyn EventStore) -> Result<ImportReport, IngestError> {
    let parsed = parse_feed(json)?;
    let upserted = store.upsert_events(&parsed.events)?;

    log::info!(
        "Imported {upserted} events ({} skipped)",
        parsed.skipped
    );

    Ok(ImportReport {
        features: parsed.events.len() + parsed.skipped,
        skipped: parsed.skipped,
        upserted,
    })
}

/// Reads a feed file and upserts every event into `store`.
///
/// # Errors
///
/// Returns an [`IngestError`] if the file cannot be read, parsed or stored.
pub fn import_file(path: &Path, store: &dyn EventStore) -> Result<ImportReport, IngestError> {
    log::info!("Importing feed {}", path.display());
    let json = std::fs::read_to_string(path)?;
    import_str(&json, store)
}
