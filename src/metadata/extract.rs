//! Interpretation of a decoded tag mapping into capture metadata.
//!
//! Every field is derived independently. A missing or corrupt tag only
//! blanks the field it feeds; nothing here is ever defaulted to zero, since
//! zero is a legitimate pitch, roll or heading.

use chrono::NaiveDateTime;
use tracing::debug;

use super::rational::{apply_hemisphere, tag_to_decimal, tag_to_degrees};
use super::{tags, TagMap, TagValue};
use crate::error::GeoError;

/// EXIF date format, e.g. `2019:07:14 10:31:07`.
const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Which tag the heading was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingSource {
    /// `GPSTrack`: direction of travel. Preferred.
    Track,
    /// `GPSImgDirection`: direction the camera was aimed.
    ImageDirection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureMetadata {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub heading_source: Option<HeadingSource>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    /// Horizontal field of view in radians.
    pub field_of_view: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub capture_time: Option<NaiveDateTime>,
}

impl CaptureMetadata {
    /// Position is only usable when both coordinates are known.
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Build a [`CaptureMetadata`] from a tag mapping. Pure; never fails.
pub fn extract_capture_metadata(map: &TagMap) -> CaptureMetadata {
    let (latitude, longitude) = match extract_position(map) {
        Some((lat, lon)) => (Some(lat), Some(lon)),
        None => (None, None),
    };

    let (heading, heading_source) = match decimal_tag(map, tags::GPS_TRACK) {
        Some(track) => (Some(track), Some(HeadingSource::Track)),
        None => match decimal_tag(map, tags::GPS_IMG_DIRECTION) {
            Some(direction) => (Some(direction), Some(HeadingSource::ImageDirection)),
            None => (None, None),
        },
    };

    CaptureMetadata {
        latitude,
        longitude,
        altitude: decimal_tag(map, tags::GPS_ALTITUDE),
        heading,
        heading_source,
        pitch: decimal_tag(map, tags::GPS_PITCH),
        roll: decimal_tag(map, tags::GPS_ROLL),
        field_of_view: extract_field_of_view(map),
        camera_make: text_tag(map, tags::MAKE),
        camera_model: text_tag(map, tags::MODEL),
        capture_time: extract_capture_time(map),
    }
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` timestamp.
pub fn parse_capture_time(value: &str) -> Result<NaiveDateTime, GeoError> {
    let trimmed = value.trim().trim_end_matches('\0');
    NaiveDateTime::parse_from_str(trimmed, EXIF_DATE_FORMAT)
        .map_err(|_| GeoError::UnparsableTimestamp(value.to_string()))
}

fn extract_position(map: &TagMap) -> Option<(f64, f64)> {
    let (lat, lat_ref, lon, lon_ref) = match (
        map.get(tags::GPS_LATITUDE),
        map.get(tags::GPS_LATITUDE_REF).and_then(TagValue::as_text),
        map.get(tags::GPS_LONGITUDE),
        map.get(tags::GPS_LONGITUDE_REF).and_then(TagValue::as_text),
    ) {
        (Some(lat), Some(lat_ref), Some(lon), Some(lon_ref)) => (lat, lat_ref, lon, lon_ref),
        _ => return None,
    };

    let latitude = match tag_to_degrees(lat) {
        Ok(v) => apply_hemisphere(v, lat_ref, 'N'),
        Err(e) => {
            debug!(tag = tags::GPS_LATITUDE, error = %e, "Dropping position");
            return None;
        }
    };
    let longitude = match tag_to_degrees(lon) {
        Ok(v) => apply_hemisphere(v, lon_ref, 'E'),
        Err(e) => {
            debug!(tag = tags::GPS_LONGITUDE, error = %e, "Dropping position");
            return None;
        }
    };

    Some((latitude, longitude))
}

fn extract_field_of_view(map: &TagMap) -> Option<f64> {
    let pixel_width = decimal_tag(map, tags::PIXEL_X_DIMENSION)?;
    let x_resolution = decimal_tag(map, tags::FOCAL_PLANE_X_RESOLUTION)?;
    let focal_length = decimal_tag(map, tags::FOCAL_LENGTH)?;

    if pixel_width == 0.0 || x_resolution == 0.0 || focal_length == 0.0 {
        return None;
    }

    let sensor_dimension = pixel_width / x_resolution;
    Some(2.0 * ((sensor_dimension / 2.0) / focal_length).atan())
}

fn extract_capture_time(map: &TagMap) -> Option<NaiveDateTime> {
    for name in [tags::DATE_TIME_DIGITIZED, tags::DATE_TIME_ORIGINAL] {
        let Some(raw) = map.get(name).and_then(TagValue::as_text) else {
            continue;
        };
        match parse_capture_time(raw) {
            Ok(time) => return Some(time),
            Err(e) => debug!(tag = name, error = %e, "Ignoring capture time"),
        }
    }
    None
}

fn decimal_tag(map: &TagMap, name: &str) -> Option<f64> {
    let value = map.get(name)?;
    match tag_to_decimal(value) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(tag = name, error = %e, "Ignoring malformed tag");
            None
        }
    }
}

fn text_tag(map: &TagMap, name: &str) -> Option<String> {
    let text = map.get(name)?.as_text()?.trim().trim_matches('"').trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
