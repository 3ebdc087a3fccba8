#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geographic lookups used by the analytics jobs.
//!
//! - [`regions`] names a zone centroid after the first matching region
//!   bounding box, with a hemisphere/ocean fallback label.
//! - [`gazetteer`] estimates coarse coordinates from free-text place
//!   descriptions when an event arrives without a location.

pub mod gazetteer;
pub mod regions;

use thiserror::Error;

/// Errors that can occur during geography operations.
#[derive(Debug, Error)]
pub enum GeographyError {
    /// A jitter standard deviation is negative or not finite.
    #[error("Invalid {axis} jitter sigma: {sigma}")]
    InvalidSigma {
        /// `"latitude"` or `"longitude"`.
        axis: &'static str,
        /// The rejected value.
        sigma: f64,
    },

    /// The coordinate jitter distribution could not be built.
    #[error("Invalid jitter: {0}")]
    Jitter(#[from] rand_distr::NormalError),
}
