mod schema;
pub mod backend;
pub mod sqlite;

use chrono::{NaiveDate, NaiveDateTime};

pub use backend::{AtomicStore, PanoramaStore};
pub use schema::SCHEMA;
pub use sqlite::SqliteStore;

use crate::geo::{MultiPoint, Point, UtmProjection};

/// Storage format for capture timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A single captured panorama.
///
/// Position fields obey one invariant: either longitude, latitude and every
/// `utm_*` field are populated, or longitude/latitude are null and so are
/// the UTM fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panorama {
    pub id: Option<i64>,
    pub sequence_id: Option<i64>,
    /// Hex SHA-256 of the raw image payload.
    pub image_digest: Option<String>,

    // Position
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub elevation: Option<f64>,
    pub utm_easting: Option<f64>,
    pub utm_northing: Option<f64>,
    pub utm_zone_code: Option<String>,
    pub utm_srid: Option<i32>,

    // Orientation and optics
    pub heading: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub field_of_view: Option<f64>,

    // Camera
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub capture_time: Option<NaiveDateTime>,

    pub address: Option<String>,
    pub note: Option<String>,
}

impl Panorama {
    pub fn new(sequence_id: i64) -> Self {
        Self {
            sequence_id: Some(sequence_id),
            ..Self::default()
        }
    }

    /// The point contributed to the sequence geometry, if positioned.
    pub fn geom_point(&self) -> Option<Point> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some(Point::new(lon, lat)),
            _ => None,
        }
    }

    pub fn apply_projection(&mut self, projection: &UtmProjection) {
        self.utm_easting = Some(projection.easting);
        self.utm_northing = Some(projection.northing);
        self.utm_zone_code = Some(projection.zone_code());
        self.utm_srid = Some(projection.srid);
    }

    pub fn clear_projection(&mut self) {
        self.utm_easting = None;
        self.utm_northing = None;
        self.utm_zone_code = None;
        self.utm_srid = None;
    }

    /// Drop coordinates and everything derived from them.
    pub fn clear_position(&mut self) {
        self.longitude = None;
        self.latitude = None;
        self.clear_projection();
    }

    pub fn has_projection(&self) -> bool {
        self.utm_easting.is_some()
            && self.utm_northing.is_some()
            && self.utm_zone_code.is_some()
            && self.utm_srid.is_some()
    }
}

/// An ordered trajectory of panoramas.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub id: i64,
    pub shooting_date: NaiveDate,
    pub note: Option<String>,
    pub geometry: MultiPoint,
}
