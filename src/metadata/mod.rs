//! Capture metadata: decoded tag mappings and their interpretation.

pub mod decode;
pub mod extract;
pub mod heading;
pub mod rational;

use anyhow::Result;
use std::collections::BTreeMap;

pub use decode::ExifDecoder;
pub use extract::{extract_capture_metadata, CaptureMetadata, HeadingSource};
pub use heading::write_heading_tag;

/// Tag names looked up by the extractor.
pub mod tags {
    pub const GPS_LATITUDE: &str = "GPSLatitude";
    pub const GPS_LATITUDE_REF: &str = "GPSLatitudeRef";
    pub const GPS_LONGITUDE: &str = "GPSLongitude";
    pub const GPS_LONGITUDE_REF: &str = "GPSLongitudeRef";
    pub const GPS_ALTITUDE: &str = "GPSAltitude";
    pub const GPS_TRACK: &str = "GPSTrack";
    pub const GPS_IMG_DIRECTION: &str = "GPSImgDirection";
    /// Not part of the EXIF standard; see [`super::ExifDecoder::with_gps_aliases`].
    pub const GPS_PITCH: &str = "GPSPitch";
    /// Not part of the EXIF standard; see [`super::ExifDecoder::with_gps_aliases`].
    pub const GPS_ROLL: &str = "GPSRoll";
    pub const PIXEL_X_DIMENSION: &str = "PixelXDimension";
    pub const FOCAL_PLANE_X_RESOLUTION: &str = "FocalPlaneXResolution";
    pub const FOCAL_LENGTH: &str = "FocalLength";
    pub const MAKE: &str = "Make";
    pub const MODEL: &str = "Model";
    pub const DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
    pub const DATE_TIME_DIGITIZED: &str = "DateTimeDigitized";
}

/// A signed rational number as stored in image metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub num: i64,
    pub den: i64,
}

impl Ratio {
    pub fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }
}

/// A decoded metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Ratios(Vec<Ratio>),
    Integers(Vec<i64>),
    Floats(Vec<f64>),
    Text(String),
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Decoded metadata keyed by tag name.
pub type TagMap = BTreeMap<String, TagValue>;

/// Turns a raw image payload into a tag mapping.
pub trait MetadataDecoder: Send + Sync {
    fn decode_metadata(&self, raw_image: &[u8]) -> Result<TagMap>;
}
