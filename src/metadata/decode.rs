//! Metadata decoder backed by kamadak-exif.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Cursor;

use super::{MetadataDecoder, Ratio, TagMap, TagValue};

/// Reads the EXIF block of a JPEG/TIFF/HEIF payload.
///
/// Fields from the primary image (including its Exif and GPS sub-IFDs) are
/// keyed by tag name, e.g. `GPSLatitude` or `DateTimeDigitized`. Thumbnail
/// fields are ignored.
///
/// Vendor GPS tags outside the EXIF standard have no name of their own;
/// [`ExifDecoder::with_gps_aliases`] assigns one by tag number so that
/// rigs writing pitch and roll into private GPS tags can be read.
#[derive(Debug, Clone, Default)]
pub struct ExifDecoder {
    gps_aliases: BTreeMap<u16, String>,
}

impl ExifDecoder {
    /// `aliases` maps a tag name, e.g. `GPSPitch`, to its GPS IFD tag number.
    pub fn with_gps_aliases<I>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (String, u16)>,
    {
        Self {
            gps_aliases: aliases
                .into_iter()
                .map(|(name, number)| (number, name))
                .collect(),
        }
    }

    fn tag_key(&self, tag: exif::Tag) -> String {
        if tag.context() == exif::Context::Gps {
            if let Some(name) = self.gps_aliases.get(&tag.number()) {
                return name.clone();
            }
        }
        tag.to_string()
    }
}

impl MetadataDecoder for ExifDecoder {
    fn decode_metadata(&self, raw_image: &[u8]) -> Result<TagMap> {
        let mut cursor = Cursor::new(raw_image);
        let exif = match exif::Reader::new().read_from_container(&mut cursor) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(_)) => return Ok(TagMap::new()),
            Err(e) => return Err(e).context("Failed to read EXIF block"),
        };

        let mut map = TagMap::new();
        for field in exif.fields() {
            if field.ifd_num != exif::In::PRIMARY {
                continue;
            }
            if let Some(value) = convert_value(&field.value) {
                map.insert(self.tag_key(field.tag), value);
            }
        }

        Ok(map)
    }
}

fn convert_value(value: &exif::Value) -> Option<TagValue> {
    let converted = match value {
        exif::Value::Rational(v) => TagValue::Ratios(
            v.iter()
                .map(|r| Ratio::new(r.num as i64, r.denom as i64))
                .collect(),
        ),
        exif::Value::SRational(v) => TagValue::Ratios(
            v.iter()
                .map(|r| Ratio::new(r.num as i64, r.denom as i64))
                .collect(),
        ),
        exif::Value::Ascii(parts) => {
            let joined: Vec<u8> = parts.iter().flatten().copied().collect();
            let text = String::from_utf8_lossy(&joined);
            TagValue::Text(text.trim_end_matches('\0').to_string())
        }
        exif::Value::Byte(v) => TagValue::Integers(v.iter().map(|&x| x as i64).collect()),
        exif::Value::Short(v) => TagValue::Integers(v.iter().map(|&x| x as i64).collect()),
        exif::Value::Long(v) => TagValue::Integers(v.iter().map(|&x| x as i64).collect()),
        exif::Value::SByte(v) => TagValue::Integers(v.iter().map(|&x| x as i64).collect()),
        exif::Value::SShort(v) => TagValue::Integers(v.iter().map(|&x| x as i64).collect()),
        exif::Value::SLong(v) => TagValue::Integers(v.iter().map(|&x| x as i64).collect()),
        exif::Value::Float(v) => TagValue::Floats(v.iter().map(|&x| x as f64).collect()),
        exif::Value::Double(v) => TagValue::Floats(v.clone()),
        // Opaque blobs (maker notes, version bytes) carry nothing we interpret
        _ => return None,
    };
    Some(converted)
}
