//! Decoders for the GPS and date/time tag subset.
//!
//! Both decoders look at every directory entry and decide on their own whether
//! the tag is one they handle; unknown tags are not an error.

use serde::Serialize;

use super::bytes::ByteView;
use super::ifd::{DiagnosticKind, DirectoryEntry};
use crate::geo::Hemisphere;

pub const TAG_GPS_LATITUDE_REF: u16 = 0x0001;
pub const TAG_GPS_LATITUDE: u16 = 0x0002;
pub const TAG_GPS_LONGITUDE_REF: u16 = 0x0003;
pub const TAG_GPS_LONGITUDE: u16 = 0x0004;
pub const TAG_GPS_ALTITUDE_REF: u16 = 0x0005;
pub const TAG_GPS_ALTITUDE: u16 = 0x0006;
pub const TAG_GPS_IMG_DIRECTION: u16 = 0x0010;
pub const TAG_GPS_H_POSITIONING_ERROR: u16 = 0x001F;

pub const TAG_DATE_TIME: u16 = 0x0132;
pub const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
pub const TAG_DATE_TIME_DIGITIZED: u16 = 0x9004;

/// GPS values as found in the block, before normalization.
///
/// Every field is independently optional; presence only says which tags
/// were encountered while walking.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsRecord {
    pub latitude_ref: Option<Hemisphere>,
    /// Degrees, minutes, seconds.
    pub latitude: Option<Vec<f64>>,
    pub longitude_ref: Option<Hemisphere>,
    pub longitude: Option<Vec<f64>>,
    /// 0 = above sea level, 1 = below.
    pub altitude_ref: Option<u8>,
    pub altitude: Option<f64>,
    pub bearing: Option<f64>,
    pub accuracy: Option<f64>,
}

impl GpsRecord {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fill fields still missing here from `other`. Earlier directories win.
    pub fn merge(self, other: GpsRecord) -> GpsRecord {
        GpsRecord {
            latitude_ref: self.latitude_ref.or(other.latitude_ref),
            latitude: self.latitude.or(other.latitude),
            longitude_ref: self.longitude_ref.or(other.longitude_ref),
            longitude: self.longitude.or(other.longitude),
            altitude_ref: self.altitude_ref.or(other.altitude_ref),
            altitude: self.altitude.or(other.altitude),
            bearing: self.bearing.or(other.bearing),
            accuracy: self.accuracy.or(other.accuracy),
        }
    }
}

/// Raw `YYYY:MM:DD HH:MM:SS` strings from the three date/time tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateTimeRecord {
    pub date_time: Option<String>,
    pub date_time_original: Option<String>,
    pub date_time_digitized: Option<String>,
}

impl DateTimeRecord {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(self, other: DateTimeRecord) -> DateTimeRecord {
        DateTimeRecord {
            date_time: self.date_time.or(other.date_time),
            date_time_original: self.date_time_original.or(other.date_time_original),
            date_time_digitized: self.date_time_digitized.or(other.date_time_digitized),
        }
    }
}

/// Result of offering one entry to a decoder.
pub type TagResult = Result<bool, DiagnosticKind>;

/// Decode `entry` into `record` if it is one of the GPS tags.
///
/// Returns `Ok(false)` for tags this decoder does not handle.
pub fn decode_gps(
    view: &ByteView<'_>,
    entry: &DirectoryEntry,
    record: &mut GpsRecord,
) -> TagResult {
    let offset = entry.payload_offset();
    match entry.tag {
        TAG_GPS_LATITUDE_REF => {
            record.latitude_ref = Some(read_hemisphere(view, entry, true)?);
        }
        TAG_GPS_LONGITUDE_REF => {
            record.longitude_ref = Some(read_hemisphere(view, entry, false)?);
        }
        TAG_GPS_LATITUDE => {
            record.latitude = Some(read_dms(view, entry)?);
        }
        TAG_GPS_LONGITUDE => {
            record.longitude = Some(read_dms(view, entry)?);
        }
        TAG_GPS_ALTITUDE_REF => {
            record.altitude_ref = Some(view.u8_at(offset).ok_or(DiagnosticKind::UnreadableValue)?);
        }
        TAG_GPS_ALTITUDE => {
            record.altitude = Some(read_scalar(view, offset)?);
        }
        TAG_GPS_IMG_DIRECTION => {
            record.bearing = Some(read_scalar(view, offset)?);
        }
        TAG_GPS_H_POSITIONING_ERROR => {
            record.accuracy = Some(read_scalar(view, offset)?);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

/// Decode `entry` into `record` if it is one of the date/time tags.
pub fn decode_date_time(
    view: &ByteView<'_>,
    entry: &DirectoryEntry,
    record: &mut DateTimeRecord,
) -> TagResult {
    let slot = match entry.tag {
        TAG_DATE_TIME => &mut record.date_time,
        TAG_DATE_TIME_ORIGINAL => &mut record.date_time_original,
        TAG_DATE_TIME_DIGITIZED => &mut record.date_time_digitized,
        _ => return Ok(false),
    };
    let text = view
        .string_at(entry.payload_offset(), entry.count as usize)
        .ok_or(DiagnosticKind::UnreadableValue)?;
    *slot = Some(text);
    Ok(true)
}

fn read_hemisphere(
    view: &ByteView<'_>,
    entry: &DirectoryEntry,
    latitude: bool,
) -> Result<Hemisphere, DiagnosticKind> {
    let text = view
        .string_at(entry.payload_offset(), entry.count as usize)
        .ok_or(DiagnosticKind::UnreadableValue)?;
    let hemisphere = text
        .trim()
        .chars()
        .next()
        .and_then(Hemisphere::from_char)
        .ok_or(DiagnosticKind::BadHemisphere)?;
    if hemisphere.is_latitude() != latitude {
        return Err(DiagnosticKind::BadHemisphere);
    }
    Ok(hemisphere)
}

fn read_dms(view: &ByteView<'_>, entry: &DirectoryEntry) -> Result<Vec<f64>, DiagnosticKind> {
    let count = (entry.count as usize).min(3);
    view.rationals_at(entry.payload_offset(), count)
        .ok_or(DiagnosticKind::UnreadableValue)
}

fn read_scalar(view: &ByteView<'_>, offset: usize) -> Result<f64, DiagnosticKind> {
    view.rational_at(offset)
        .map(|r| r.to_f64())
        .ok_or(DiagnosticKind::UnreadableValue)
}
