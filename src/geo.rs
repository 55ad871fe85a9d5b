//! Conversion between EXIF degrees/minutes/seconds and signed decimal degrees.

use serde::{Deserialize, Serialize};

use crate::error::GeotagError;

/// Denominator used for the seconds rational when writing GPS tags
/// (millisecond-of-arcsecond precision).
pub const SECONDS_DENOMINATOR: u32 = 1000;

/// Hemisphere reference of a GPS coordinate (`GPSLatitudeRef` / `GPSLongitudeRef`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Self::North),
            'S' => Some(Self::South),
            'E' => Some(Self::East),
            'W' => Some(Self::West),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::North => 'N',
            Self::South => 'S',
            Self::East => 'E',
            Self::West => 'W',
        }
    }

    /// South and West hemispheres carry a negative sign.
    pub fn is_negative(self) -> bool {
        matches!(self, Self::South | Self::West)
    }

    pub fn is_latitude(self) -> bool {
        matches!(self, Self::North | Self::South)
    }
}

/// A coordinate split into its EXIF representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dms {
    pub hemisphere: Hemisphere,
    pub degrees: u32,
    pub minutes: u32,
    pub seconds: f64,
}

impl Dms {
    /// Seconds as the integer numerator written over [`SECONDS_DENOMINATOR`].
    pub fn seconds_numerator(&self) -> u32 {
        (self.seconds * SECONDS_DENOMINATOR as f64).round() as u32
    }
}

/// Convert a decoded `[degrees, minutes, seconds]` triple into signed decimal degrees.
///
/// Returns `None` when the hemisphere is missing or fewer than three components
/// were decoded. Non-finite components count as 0.
pub fn to_decimal(dms: &[f64], hemisphere: Option<Hemisphere>) -> Option<f64> {
    let hemisphere = hemisphere?;
    if dms.len() < 3 {
        return None;
    }
    let part = |i: usize| {
        let v = dms[i];
        if v.is_finite() { v } else { 0.0 }
    };
    let decimal = part(0) + part(1) / 60.0 + part(2) / 3600.0;
    Some(if hemisphere.is_negative() { -decimal } else { decimal })
}

/// Split signed decimal degrees into hemisphere, degrees, minutes and seconds.
///
/// Seconds are rounded to 1/[`SECONDS_DENOMINATOR`] of an arcsecond and the
/// rounding carries into minutes and degrees, so seconds stay below 60 and
/// minutes below 60.
pub fn to_dms(decimal: f64, is_latitude: bool) -> Dms {
    let hemisphere = match (is_latitude, decimal >= 0.0) {
        (true, true) => Hemisphere::North,
        (true, false) => Hemisphere::South,
        (false, true) => Hemisphere::East,
        (false, false) => Hemisphere::West,
    };
    let per_second = u64::from(SECONDS_DENOMINATOR);
    let per_minute = 60 * per_second;
    let per_degree = 60 * per_minute;
    let total = (decimal.abs() * per_degree as f64).round() as u64;
    let degrees = total / per_degree;
    let minutes = total % per_degree / per_minute;
    let fraction = total % per_minute;
    Dms {
        hemisphere,
        degrees: degrees as u32,
        minutes: minutes as u32,
        seconds: fraction as f64 / per_second as f64,
    }
}

/// Apply `GPSAltitudeRef`: 1 means below sea level.
pub fn signed_altitude(magnitude: f64, altitude_ref: Option<u8>) -> f64 {
    if altitude_ref == Some(1) { -magnitude } else { magnitude }
}

pub fn is_valid_latitude(latitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude)
}

pub fn is_valid_longitude(longitude: f64) -> bool {
    (-180.0..=180.0).contains(&longitude)
}

/// Reject coordinates outside `[-90, 90] × [-180, 180]` (NaN included).
pub fn validate(latitude: f64, longitude: f64) -> Result<(), GeotagError> {
    if is_valid_latitude(latitude) && is_valid_longitude(longitude) {
        Ok(())
    } else {
        Err(GeotagError::InvalidCoordinates { latitude, longitude })
    }
}

/// Final GPS position of a photo, always within the valid coordinate ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub bearing: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: Option<String>,
}

impl GeoCoordinate {
    /// Build a coordinate, refusing values outside the valid ranges.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        validate(latitude, longitude).ok()?;
        Some(Self {
            latitude,
            longitude,
            altitude: None,
            bearing: None,
            accuracy: None,
            timestamp: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn north_east_are_positive() {
        let lat = to_decimal(&[78.0, 13.0, 16.26], Some(Hemisphere::North)).unwrap();
        let lon = to_decimal(&[15.0, 38.0, 23.01], Some(Hemisphere::East)).unwrap();
        assert!((lat - 78.221_183_333).abs() < 1e-8);
        assert!((lon - 15.639_725).abs() < 1e-8);
    }

    #[test]
    fn south_west_are_non_positive() {
        for dms in [[0.0, 0.0, 0.0], [33.0, 51.0, 54.0], [151.0, 12.0, 36.5]] {
            assert!(to_decimal(&dms, Some(Hemisphere::South)).unwrap() <= 0.0);
            assert!(to_decimal(&dms, Some(Hemisphere::West)).unwrap() <= 0.0);
            assert!(to_decimal(&dms, Some(Hemisphere::North)).unwrap() >= 0.0);
            assert!(to_decimal(&dms, Some(Hemisphere::East)).unwrap() >= 0.0);
        }
    }

    #[test]
    fn missing_reference_or_components_is_invalid() {
        assert_eq!(to_decimal(&[1.0, 2.0, 3.0], None), None);
        assert_eq!(to_decimal(&[1.0, 2.0], Some(Hemisphere::North)), None);
        assert_eq!(to_decimal(&[], Some(Hemisphere::North)), None);
    }

    #[test]
    fn non_finite_components_count_as_zero() {
        let v = to_decimal(&[10.0, f64::NAN, 36.0], Some(Hemisphere::North)).unwrap();
        assert!((v - 10.01).abs() < 1e-12);
    }

    #[test]
    fn hemisphere_chars() {
        assert_eq!(Hemisphere::from_char('s'), Some(Hemisphere::South));
        assert_eq!(Hemisphere::from_char('X'), None);
        assert_eq!(Hemisphere::West.as_char(), 'W');
        assert!(Hemisphere::North.is_latitude());
        assert!(!Hemisphere::East.is_latitude());
    }

    #[test]
    fn to_dms_splits_components() {
        let dms = to_dms(-33.8688, true);
        assert_eq!(dms.hemisphere, Hemisphere::South);
        assert_eq!(dms.degrees, 33);
        assert_eq!(dms.minutes, 52);
        assert!((dms.seconds - 7.68).abs() < 1e-6);
        assert_eq!(dms.seconds_numerator(), 7680);

        assert_eq!(to_dms(0.0, false).hemisphere, Hemisphere::East);
        assert_eq!(to_dms(-0.5, false).hemisphere, Hemisphere::West);
    }

    #[test]
    fn seconds_rounding_carries_into_minutes_and_degrees() {
        let dms = to_dms(9.999_999_99, true);
        assert_eq!((dms.degrees, dms.minutes, dms.seconds_numerator()), (10, 0, 0));

        let dms = to_dms(-12.516_666_666_6, false);
        assert_eq!(dms.hemisphere, Hemisphere::West);
        assert_eq!((dms.degrees, dms.minutes, dms.seconds_numerator()), (12, 31, 0));

        let dms = to_dms(179.999_999_9, false);
        assert_eq!((dms.degrees, dms.minutes, dms.seconds_numerator()), (180, 0, 0));
    }

    #[test]
    fn dms_round_trip_within_rational_precision() {
        let mut lat = -90.0;
        while lat <= 90.0 {
            let dms = to_dms(lat, true);
            let seconds = dms.seconds_numerator() as f64 / SECONDS_DENOMINATOR as f64;
            let back = to_decimal(
                &[dms.degrees as f64, dms.minutes as f64, seconds],
                Some(dms.hemisphere),
            )
            .unwrap();
            assert!((back - lat).abs() < 1e-4, "lat {lat} came back as {back}");
            lat += 0.731_3;
        }

        let mut lon = -180.0;
        while lon <= 180.0 {
            let dms = to_dms(lon, false);
            let seconds = dms.seconds_numerator() as f64 / SECONDS_DENOMINATOR as f64;
            let back = to_decimal(
                &[dms.degrees as f64, dms.minutes as f64, seconds],
                Some(dms.hemisphere),
            )
            .unwrap();
            assert!((back - lon).abs() < 1e-4, "lon {lon} came back as {back}");
            lon += 1.377_7;
        }
    }

    #[test]
    fn altitude_below_sea_level() {
        assert_eq!(signed_altitude(12.5, Some(1)), -12.5);
        assert_eq!(signed_altitude(12.5, Some(0)), 12.5);
        assert_eq!(signed_altitude(12.5, None), 12.5);
    }

    #[test]
    fn validation_bounds() {
        assert!(validate(90.0, -180.0).is_ok());
        assert!(validate(91.0, 0.0).is_err());
        assert!(validate(0.0, 180.5).is_err());
        assert!(validate(f64::NAN, 0.0).is_err());
        assert!(GeoCoordinate::new(-90.5, 10.0).is_none());
        assert!(GeoCoordinate::new(45.0, 10.0).is_some());
    }
}
