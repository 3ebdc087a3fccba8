//! Coarse coordinate estimates from free-text place descriptions.
//!
//! Used as the last resort when an event has no usable neighbour to borrow
//! a coordinate from. Each anchor is a well-known seismic region; matched
//! anchors receive Gaussian jitter so that several estimated events do not
//! collapse onto one exact point.

use rand::Rng;
use rand_distr::{Distribution as _, Normal};

use crate::GeographyError;

/// Default latitude jitter standard deviation, in degrees.
pub const LATITUDE_JITTER_DEGREES: f64 = 2.0;

/// Default longitude jitter standard deviation, in degrees.
pub const LONGITUDE_JITTER_DEGREES: f64 = 3.0;

/// `(needle, latitude, longitude)`, matched in order.
pub const ANCHORS: &[(&str, f64, f64)] = &[
    ("Pacific", 0.0, -170.0),
    ("California", 36.0, -120.0),
    ("Alaska", 64.0, -153.0),
    ("Japan", 36.0, 138.0),
    ("Chile", -30.0, -71.0),
    ("Indonesia", -5.0, 120.0),
    ("Turkey", 39.0, 35.0),
    ("Iran", 32.0, 53.0),
    ("Mexico", 23.0, -102.0),
    ("Philippines", 13.0, 122.0),
    ("New Zealand", -41.0, 174.0),
];

/// Place-name gazetteer with configurable jitter.
#[derive(Debug, Clone, Copy)]
pub struct Gazetteer {
    lat_jitter: Normal<f64>,
    lon_jitter: Normal<f64>,
}

impl Gazetteer {
    /// Creates a gazetteer with the default jitter (σ 2° latitude, 3°
    /// longitude).
    ///
    /// # Errors
    ///
    /// Returns [`GeographyError`] if the jitter distribution is invalid.
    pub fn new() -> Result<Self, GeographyError> {
        Self::with_jitter(LATITUDE_JITTER_DEGREES, LONGITUDE_JITTER_DEGREES)
    }

    /// Creates a gazetteer with custom jitter standard deviations. Zero
    /// disables jitter on that axis.
    ///
    /// # Errors
    ///
    /// Returns [`GeographyError`] if either deviation is negative or not
    /// finite.
    pub fn with_jitter(lat_sigma: f64, lon_sigma: f64) -> Result<Self, GeographyError> {
        check_sigma("latitude", lat_sigma)?;
        check_sigma("longitude", lon_sigma)?;
        Ok(Self {
            lat_jitter: Normal::new(0.0, lat_sigma)?,
            lon_jitter: Normal::new(0.0, lon_sigma)?,
        })
    }

    /// Returns the un-jittered anchor for `place`: the first anchor whose
    /// name occurs in it, compared case-insensitively.
    #[must_use]
    pub fn anchor(place: &str) -> Option<(f64, f64)> {
        let place = place.to_uppercase();
        ANCHORS
            .iter()
            .find(|(needle, _, _)| place.contains(&needle.to_uppercase()))
            .map(|&(_, lat, lon)| (lat, lon))
    }

    /// Estimates `(latitude, longitude)` for `place`, or `None` when no
    /// anchor matches.
    pub fn estimate<R: Rng + ?Sized>(&self, place: &str, rng: &mut R) -> Option<(f64, f64)> {
        let (lat, lon) = Self::anchor(place)?;
        let estimate = (
            lat + self.lat_jitter.sample(rng),
            lon + self.lon_jitter.sample(rng),
        );
        log::trace!("Estimated {estimate:?} for place {place:?}");
        Some(estimate)
    }
}

fn check_sigma(axis: &'static str, sigma: f64) -> Result<(), GeographyError> {
    if sigma.is_finite() && sigma >= 0.0 {
        Ok(())
    } else {
        Err(GeographyError::InvalidSigma { axis, sigma })
    }
}
