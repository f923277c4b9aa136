//! Recoverable errors raised while interpreting capture metadata.
//!
//! None of these abort an ingestion. The extractor and the projector turn
//! them into absent fields and log what was dropped.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    /// A rational tag had a zero denominator (or no components at all).
    #[error("Malformed rational value: {0}")]
    MalformedRational(String),

    /// A date tag did not match `YYYY:MM:DD HH:MM:SS`.
    #[error("Unparsable timestamp: {0:?}")]
    UnparsableTimestamp(String),

    /// Longitude/latitude outside [-180, 180] / [-90, 90], or not finite.
    #[error("Invalid coordinate: longitude {longitude}, latitude {latitude}")]
    InvalidCoordinate { longitude: f64, latitude: f64 },
}
