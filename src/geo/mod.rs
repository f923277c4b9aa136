//! Geographic primitives and the UTM projector.
//!
//! Positions are `geo` points with `x` = longitude and `y` = latitude in
//! WGS84 degrees. Sequence geometries are multipoints persisted as WKT.

pub mod utm;

use anyhow::{anyhow, Result};
use geo::{Distance, Haversine};
use wkt::{ToWkt, TryFromWkt};

pub use geo::{MultiPoint, Point};
pub use utm::{project, UtmProjection};

/// Geometry of a sequence with no positioned panorama.
pub fn empty_geometry() -> MultiPoint<f64> {
    MultiPoint::new(Vec::new())
}

/// Well-known text of a sequence geometry.
pub fn geometry_to_wkt(geometry: &MultiPoint<f64>) -> String {
    geometry.wkt_string()
}

/// Parse a sequence geometry stored as WKT.
pub fn geometry_from_wkt(text: &str) -> Result<MultiPoint<f64>> {
    MultiPoint::<f64>::try_from_wkt_str(text)
        .map_err(|e| anyhow!("Invalid MULTIPOINT geometry {:?}: {}", text, e))
}

/// Great-circle length in meters of the path through `geometry`'s points
/// in their stored order.
pub fn track_length_m(geometry: &MultiPoint<f64>) -> f64 {
    geometry
        .0
        .windows(2)
        .map(|pair| Haversine::distance(pair[0], pair[1]))
        .sum()
}
