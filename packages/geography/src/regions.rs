//! Named region lookup for zone centroids.
//!
//! Regions are latitude/longitude boxes with inclusive bounds, checked in
//! table order; the first box containing the point names it. Overlaps are
//! intentional (e.g. "Asia" shadows most of "Southeast Asia").

use std::sync::LazyLock;

use geo::{Intersects as _, Point, Rect, coord};

/// `(name, lat_min, lat_max, lon_min, lon_max)` in match order.
const REGION_BOUNDS: &[(&str, f64, f64, f64, f64)] = &[
    ("North America", 15.0, 75.0, -170.0, -50.0),
    ("South America", -60.0, 15.0, -85.0, -30.0),
    ("Europe", 35.0, 75.0, -10.0, 60.0),
    ("Africa", -40.0, 40.0, -20.0, 55.0),
    ("Asia", -10.0, 55.0, 55.0, 145.0),
    ("Southeast Asia", -15.0, 25.0, 90.0, 145.0),
    ("East Asia", 25.0, 50.0, 120.0, 150.0),
    ("Oceania", -50.0, 0.0, 110.0, 180.0),
    ("Oceania", -50.0, 0.0, -180.0, -160.0),
    ("Pacific Ocean", -30.0, 30.0, -180.0, -120.0),
    ("Atlantic Ocean", -60.0, 70.0, -60.0, 20.0),
    ("Indian Ocean", -60.0, 30.0, 20.0, 120.0),
    ("Arctic Region", 70.0, 90.0, -180.0, 180.0),
    ("Antarctic Region", -90.0, -60.0, -180.0, 180.0),
];

static REGIONS: LazyLock<Vec<(&'static str, Rect<f64>)>> = LazyLock::new(|| {
    REGION_BOUNDS
        .iter()
        .map(|&(name, lat_min, lat_max, lon_min, lon_max)| {
            (
                name,
                Rect::new(
                    coord! { x: lon_min, y: lat_min },
                    coord! { x: lon_max, y: lat_max },
                ),
            )
        })
        .collect()
});

/// Returns the name of the first region containing `(lat, lon)`, if any.
#[must_use]
pub fn named_region(lat: f64, lon: f64) -> Option<&'static str> {
    let point = Point::new(lon, lat);
    REGIONS
        .iter()
        .find(|(_, bounds)| bounds.intersects(&point))
        .map(|(name, _)| *name)
}

/// Resolves a human-readable zone name for a centroid.
///
/// Falls back to `"<Ocean> - <NS><EW> (lat, lon)"` when no named region
/// matches.
#[must_use]
pub fn zone_name(lat: f64, lon: f64) -> String {
    named_region(lat, lon).map_or_else(|| fallback_name(lat, lon), str::to_string)
}

fn fallback_name(lat: f64, lon: f64) -> String {
    let ns = if lat > 0.0 { "North" } else { "South" };
    let ew = if lon > 0.0 { "East" } else { "West" };

    let ocean = match lon.abs() {
        x if x > 30.0 && x < 120.0 => "Indian Ocean",
        x if x >= 120.0 => "Pacific Ocean",
        _ => "Atlantic Ocean",
    };

    format!("{ocean} - {ns}{ew} ({lat:.1}, {lon:.1})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_region_wins() {
        assert_eq!(zone_name(37.0, -122.0), "North America");
        assert_eq!(zone_name(-33.0, -70.0), "South America");
        // Tokyo sits in both the Asia and East Asia boxes.
        assert_eq!(zone_name(35.7, 139.7), "Asia");
        assert_eq!(zone_name(-41.0, 174.0), "Oceania");
        assert_eq!(zone_name(-20.0, -170.0), "Oceania");
        assert_eq!(zone_name(10.0, -150.0), "Pacific Ocean");
        assert_eq!(zone_name(80.0, 100.0), "Arctic Region");
        assert_eq!(zone_name(-75.0, 0.0), "Antarctic Region");
    }

    #[test]
    fn bounds_are_inclusive() {
        assert_eq!(zone_name(15.0, -50.0), "North America");
        assert_eq!(zone_name(-60.0, -85.0), "South America");
    }

    #[test]
    fn unmatched_points_get_generated_label() {
        assert_eq!(
            zone_name(40.0, 165.0),
            "Pacific Ocean - NorthEast (40.0, 165.0)"
        );
        assert_eq!(
            zone_name(-55.0, -100.0),
            "Indian Ocean - SouthWest (-55.0, -100.0)"
        );
        assert_eq!(named_region(40.0, 165.0), None);
    }
}
