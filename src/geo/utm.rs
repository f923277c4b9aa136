//! WGS84 to UTM projection.
//!
//! Zones follow the plain 6° longitude banding with no Norway/Svalbard
//! exceptions, so the EPSG code is always a function of the band alone.
//! Latitudes outside [-80, 84] are still projected but flagged as outside
//! standard UTM coverage.

use std::f64::consts::PI;
use tracing::warn;

use crate::error::GeoError;

const K0: f64 = 0.9996;
const EQUATORIAL_RADIUS: f64 = 6_378_137.0;
const E: f64 = 0.006_694_38;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = E / (1.0 - E);

const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;

const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

const EPSG_NORTH_BASE: i32 = 32600;
const EPSG_SOUTH_BASE: i32 = 32700;

const ZONE_LETTERS: &[u8; 20] = b"CDEFGHJKLMNPQRSTUVWX";
const MIN_COVERED_LATITUDE: f64 = -80.0;
const MAX_COVERED_LATITUDE: f64 = 84.0;

#[derive(Debug, Clone, PartialEq)]
pub struct UtmProjection {
    pub srid: i32,
    pub zone_number: u8,
    pub zone_letter: char,
    pub easting: f64,
    pub northing: f64,
    /// False for polar latitudes outside [-80, 84].
    pub within_standard_coverage: bool,
}

impl UtmProjection {
    /// Zone designator such as `33T`.
    pub fn zone_code(&self) -> String {
        format!("{}{}", self.zone_number, self.zone_letter)
    }

    pub fn is_northern(&self) -> bool {
        self.srid < EPSG_SOUTH_BASE
    }
}

/// 6° longitude band, 1..=60. Longitude 180 folds into zone 60.
pub fn zone_number(longitude: f64) -> u8 {
    let zone = ((longitude + 180.0) / 6.0).floor() as i32 + 1;
    zone.clamp(1, 60) as u8
}

/// Latitude band letter, clamped to `C`/`X` outside standard coverage.
pub fn zone_letter(latitude: f64) -> char {
    let index = ((latitude - MIN_COVERED_LATITUDE) / 8.0).floor() as i32;
    ZONE_LETTERS[index.clamp(0, ZONE_LETTERS.len() as i32 - 1) as usize] as char
}

/// EPSG code of the WGS84 / UTM zone containing the point.
pub fn srid_for(longitude: f64, latitude: f64) -> i32 {
    let base = if latitude >= 0.0 {
        EPSG_NORTH_BASE
    } else {
        EPSG_SOUTH_BASE
    };
    base + zone_number(longitude) as i32
}

/// Closed-form EPSG arithmetic:
/// `32700 - round((45 + lat) / 90) * 100 + round((183 + lon) / 6)`.
///
/// Rounds half away from zero. Agrees with [`srid_for`] for longitudes in
/// [-180, 180) and latitudes in [-80, 84]; diverges at longitude 180 and
/// near the poles.
pub fn closed_form_srid(longitude: f64, latitude: f64) -> i32 {
    let hemisphere = ((45.0 + latitude) / 90.0).round();
    let zone = ((183.0 + longitude) / 6.0).round();
    (EPSG_SOUTH_BASE as f64 - hemisphere * 100.0 + zone) as i32
}

/// Project a WGS84 coordinate into its UTM zone.
pub fn project(longitude: f64, latitude: f64) -> Result<UtmProjection, GeoError> {
    if !longitude.is_finite()
        || !latitude.is_finite()
        || !(-180.0..=180.0).contains(&longitude)
        || !(-90.0..=90.0).contains(&latitude)
    {
        return Err(GeoError::InvalidCoordinate {
            longitude,
            latitude,
        });
    }

    let zone = zone_number(longitude);
    let srid = srid_for(longitude, latitude);

    let closed_form = closed_form_srid(longitude, latitude);
    if closed_form != srid {
        warn!(
            longitude,
            latitude,
            srid,
            closed_form,
            "EPSG formulas disagree; using band-derived code"
        );
    }

    let (easting, northing) = transverse_mercator(longitude, latitude, zone);

    Ok(UtmProjection {
        srid,
        zone_number: zone,
        zone_letter: zone_letter(latitude),
        easting,
        northing,
        within_standard_coverage: (MIN_COVERED_LATITUDE..=MAX_COVERED_LATITUDE)
            .contains(&latitude),
    })
}

fn central_longitude(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

fn wrap_angle(value: f64) -> f64 {
    (value + PI).rem_euclid(2.0 * PI) - PI
}

fn transverse_mercator(longitude: f64, latitude: f64, zone: u8) -> (f64, f64) {
    let lat_rad = latitude.to_radians();
    let lat_sin = lat_rad.sin();
    let lat_cos = lat_rad.cos();
    let lat_tan = lat_sin / lat_cos;
    let lat_tan2 = lat_tan * lat_tan;
    let lat_tan4 = lat_tan2 * lat_tan2;

    let lon_rad = longitude.to_radians();
    let central_lon_rad = central_longitude(zone).to_radians();

    let n = EQUATORIAL_RADIUS / (1.0 - E * lat_sin * lat_sin).sqrt();
    let c = E_P2 * lat_cos * lat_cos;

    let a = lat_cos * wrap_angle(lon_rad - central_lon_rad);
    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let m = EQUATORIAL_RADIUS
        * (M1 * lat_rad - M2 * (2.0 * lat_rad).sin() + M3 * (4.0 * lat_rad).sin()
            - M4 * (6.0 * lat_rad).sin());

    let easting = K0
        * n
        * (a + a3 / 6.0 * (1.0 - lat_tan2 + c)
            + a5 / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * lat_tan
            * (a2 / 2.0
                + a4 / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                + a6 / 720.0 * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));
    if latitude < 0.0 {
        northing += FALSE_NORTHING_SOUTH;
    }

    (easting, northing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rome() {
        let p = project(12.5, 41.9).unwrap();
        assert_eq!(p.zone_number, 33);
        assert_eq!(p.zone_letter, 'T');
        assert_eq!(p.zone_code(), "33T");
        assert_eq!(p.srid, 32633);
        assert!(p.is_northern());
        assert!(p.within_standard_coverage);
        // West of the 15°E central meridian
        assert!(p.easting < 500_000.0 && p.easting > 200_000.0);
        assert!((p.northing - 4_640_000.0).abs() < 10_000.0);
    }

    #[test]
    fn test_buenos_aires() {
        let p = project(-58.4, -34.6).unwrap();
        assert_eq!(p.zone_number, 21);
        assert_eq!(p.zone_letter, 'H');
        assert_eq!(p.srid, 32721);
        assert!(!p.is_northern());
        // Southern northings carry the 10,000 km false northing
        assert!(p.northing > 6_000_000.0 && p.northing < 6_300_000.0);
    }

    #[test]
    fn test_central_meridian_values() {
        let equator = project(15.0, 0.0).unwrap();
        assert!((equator.easting - 500_000.0).abs() < 1e-6);
        assert!(equator.northing.abs() < 1e-6);
        assert_eq!(equator.srid, 32633);

        // Meridian arc to 45°N is 4,984,944.378 m, scaled by k0
        let mid = project(15.0, 45.0).unwrap();
        assert!((mid.easting - 500_000.0).abs() < 1e-6);
        assert!((mid.northing - 0.9996 * 4_984_944.378).abs() < 1.0);
    }

    #[test]
    fn test_easting_symmetric_about_central_meridian() {
        let west = project(13.0, 50.0).unwrap();
        let east = project(17.0, 50.0).unwrap();
        assert!(((500_000.0 - west.easting) - (east.easting - 500_000.0)).abs() < 1e-6);
        assert!((west.northing - east.northing).abs() < 1e-6);
    }

    #[test]
    fn test_zone_boundaries() {
        assert_eq!(zone_number(-180.0), 1);
        assert_eq!(zone_number(-174.0), 2);
        assert_eq!(zone_number(-0.000001), 30);
        assert_eq!(zone_number(0.0), 31);
        assert_eq!(zone_number(179.999), 60);
        assert_eq!(zone_number(180.0), 60);
    }

    #[test]
    fn test_srid_formulas_agree_inside_coverage() {
        let mut lon = -180.0;
        while lon < 180.0 {
            let mut lat = -80.0;
            while lat <= 84.0 {
                assert_eq!(
                    srid_for(lon, lat),
                    closed_form_srid(lon, lat),
                    "lon {} lat {}",
                    lon,
                    lat
                );
                lat += 0.5;
            }
            lon += 0.5;
        }
    }

    #[test]
    fn test_srid_formulas_at_edges() {
        // Equator counts as north in both
        assert_eq!(srid_for(0.0, 0.0), 32631);
        assert_eq!(closed_form_srid(0.0, 0.0), 32631);
        // Closed form overflows into a nonexistent zone 61 at the antimeridian
        assert_eq!(srid_for(180.0, 10.0), 32660);
        assert_eq!(closed_form_srid(180.0, 10.0), 32661);
        // And picks the wrong hemisphere at the pole
        assert_eq!(srid_for(10.0, 90.0), 32632);
        assert_ne!(closed_form_srid(10.0, 90.0), 32632);
    }

    #[test]
    fn test_polar_latitudes_are_flagged() {
        let p = project(10.0, 86.0).unwrap();
        assert_eq!(p.zone_letter, 'X');
        assert!(!p.within_standard_coverage);

        let p = project(10.0, -85.0).unwrap();
        assert_eq!(p.zone_letter, 'C');
        assert!(!p.within_standard_coverage);

        assert_eq!(zone_letter(84.0), 'X');
        assert_eq!(zone_letter(-80.0), 'C');
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(matches!(project(181.0, 0.0), Err(GeoError::InvalidCoordinate { .. })));
        assert!(project(0.0, -90.5).is_err());
        assert!(project(f64::NAN, 0.0).is_err());
        assert!(project(0.0, f64::INFINITY).is_err());
    }
}
