//! Rational and angle conversions for camera metadata values.

use super::{Ratio, TagValue};
use crate::error::GeoError;

/// Convert a single rational into a plain decimal.
pub fn ratio_to_decimal(ratio: Ratio) -> Result<f64, GeoError> {
    if ratio.den == 0 {
        return Err(GeoError::MalformedRational(format!(
            "{}/{}",
            ratio.num, ratio.den
        )));
    }
    Ok(ratio.num as f64 / ratio.den as f64)
}

/// Convert a degrees/minutes/seconds triple into decimal degrees.
pub fn dms_to_decimal(degrees: Ratio, minutes: Ratio, seconds: Ratio) -> Result<f64, GeoError> {
    let d = ratio_to_decimal(degrees)?;
    let m = ratio_to_decimal(minutes)?;
    let s = ratio_to_decimal(seconds)?;
    Ok(d + m / 60.0 + s / 3600.0)
}

/// Apply a hemisphere reference to an unsigned decimal angle.
///
/// `positive_ref` is 'N' for latitudes and 'E' for longitudes. The angle
/// keeps its sign only when the reference starts with exactly that letter;
/// anything else, lowercase and blank references included, negates it.
pub fn apply_hemisphere(value: f64, reference: &str, positive_ref: char) -> f64 {
    if reference.chars().next() == Some(positive_ref) {
        value
    } else {
        -value
    }
}

/// Interpret a tag as a plain decimal number.
///
/// Rational tags use their first component; integer and float tags are
/// taken as-is. Text tags are parsed when they hold a number.
pub fn tag_to_decimal(value: &TagValue) -> Result<f64, GeoError> {
    match value {
        TagValue::Ratios(ratios) => ratios
            .first()
            .copied()
            .ok_or_else(|| GeoError::MalformedRational("empty rational".to_string()))
            .and_then(ratio_to_decimal),
        TagValue::Integers(values) => values
            .first()
            .map(|&v| v as f64)
            .ok_or_else(|| GeoError::MalformedRational("empty integer list".to_string())),
        TagValue::Floats(values) => values
            .first()
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| GeoError::MalformedRational("empty or non-finite float".to_string())),
        TagValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| GeoError::MalformedRational(text.clone())),
    }
}

/// Interpret a tag as a DMS triple in decimal degrees.
pub fn tag_to_degrees(value: &TagValue) -> Result<f64, GeoError> {
    match value {
        TagValue::Ratios(ratios) if ratios.len() >= 3 => {
            dms_to_decimal(ratios[0], ratios[1], ratios[2])
        }
        TagValue::Floats(values) if values.len() >= 3 => {
            Ok(values[0] + values[1] / 60.0 + values[2] / 3600.0)
        }
        other => Err(GeoError::MalformedRational(format!(
            "expected degrees/minutes/seconds, got {:?}",
            other
        ))),
    }
}
