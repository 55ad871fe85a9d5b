use chrono::NaiveDateTime;
use image::{ImageDecoder, ImageFormat, ImageReader};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::ifd::{WalkOutcome, walk};
use super::tags::{DateTimeRecord, GpsRecord};
use crate::error::{GeotagError, Result};
use crate::geo::{self, GeoCoordinate};

/// JPEG APP1 payloads sometimes still carry their `Exif\0\0` identifier.
const EXIF_IDENTIFIER: &[u8] = b"Exif\0\0";

/// `YYYY:MM:DD HH:MM:SS`
const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Which field a capture time came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateTimeSource {
    DateTimeOriginal,
    DateTimeDigitized,
    DateTime,
    /// Filesystem modification time, used when no EXIF date parses.
    FileModified,
}

/// Capture time of a photo together with where it was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureTime {
    pub value: NaiveDateTime,
    pub source: DateTimeSource,
}

/// Everything known about an image after extraction.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataResult {
    pub path: PathBuf,
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color_type: String,
    pub has_alpha: bool,
    /// EXIF orientation (1–8) as reported by the decoder.
    pub orientation: Option<u8>,
    pub has_icc_profile: bool,
    /// Whether the container carried an EXIF block at all.
    pub has_exif: bool,
    /// Decoded EXIF block, `None` when absent or undecodable.
    pub exif: Option<WalkOutcome>,
    pub gps: Option<GeoCoordinate>,
    pub timestamp: Option<CaptureTime>,
}

/// Read container metadata, GPS position and capture time from an image.
///
/// Only failures to open or decode the container are errors. A missing or
/// corrupt EXIF block just leaves `gps` and `timestamp` empty.
pub fn extract(path: &Path) -> Result<MetadataResult> {
    let io_err = |source| GeotagError::Io { path: path.to_path_buf(), source };
    let decode_err = |e: image::ImageError| GeotagError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let reader = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?;
    let format = reader.format();
    let mut decoder = reader.into_decoder().map_err(decode_err)?;

    let (width, height) = decoder.dimensions();
    let color_type = decoder.color_type();
    let orientation = decoder.orientation().ok().map(|o| o.to_exif());
    let has_icc_profile = decoder.icc_profile().ok().flatten().is_some();

    let mut exif_block = decoder.exif_metadata().ok().flatten();
    if exif_block.is_none() && format == Some(ImageFormat::Tiff) {
        // TIFF-structured containers are an EXIF block themselves.
        exif_block = std::fs::read(path).ok();
    }

    let has_exif = exif_block.is_some();
    let exif = exif_block.as_deref().and_then(|block| decode_block(path, block));

    let (gps, timestamp) = match &exif {
        Some(outcome) => {
            let timestamp = select_timestamp(&outcome.date_time);
            let mut gps = gps_from_record(&outcome.gps);
            if let (Some(gps), Some(ts)) = (gps.as_mut(), timestamp.as_ref()) {
                gps.timestamp = Some(ts.value.format(EXIF_DATE_FORMAT).to_string());
            }
            (gps, timestamp)
        }
        None => (None, None),
    };

    if let Some(gps) = &gps {
        log::debug!("{}: GPS {:.6}, {:.6}", path.display(), gps.latitude, gps.longitude);
    }

    Ok(MetadataResult {
        path: path.to_path_buf(),
        format: format.map(|f| format!("{f:?}")),
        width,
        height,
        color_type: format!("{color_type:?}"),
        has_alpha: color_type.has_alpha(),
        orientation,
        has_icc_profile,
        has_exif,
        exif,
        gps,
        timestamp,
    })
}

/// Walk a raw EXIF block, keeping a decoder fault from failing the whole extraction.
fn decode_block(path: &Path, block: &[u8]) -> Option<WalkOutcome> {
    let block = block.strip_prefix(EXIF_IDENTIFIER).unwrap_or(block);
    match std::panic::catch_unwind(|| walk(block)) {
        Ok(outcome) => {
            if !outcome.diagnostics.is_empty() {
                log::debug!(
                    "{}: {} EXIF entries skipped",
                    path.display(),
                    outcome.diagnostics.len()
                );
            }
            Some(outcome)
        }
        Err(_) => {
            log::warn!("EXIF decoder failed on {}", path.display());
            None
        }
    }
}

/// Turn decoded GPS tags into a validated coordinate.
///
/// Latitude, longitude and both hemisphere references must all be present;
/// out-of-range results count as no GPS data.
pub fn gps_from_record(record: &GpsRecord) -> Option<GeoCoordinate> {
    let latitude = geo::to_decimal(record.latitude.as_deref()?, record.latitude_ref)?;
    let longitude = geo::to_decimal(record.longitude.as_deref()?, record.longitude_ref)?;

    let Some(mut coordinate) = GeoCoordinate::new(latitude, longitude) else {
        log::debug!("Discarding out-of-range GPS position {latitude}, {longitude}");
        return None;
    };
    coordinate.altitude = record
        .altitude
        .filter(|a| a.is_finite())
        .map(|a| geo::signed_altitude(a, record.altitude_ref));
    coordinate.bearing = record.bearing.filter(|b| b.is_finite());
    coordinate.accuracy = record.accuracy.filter(|a| a.is_finite());
    Some(coordinate)
}

/// Parse a literal `YYYY:MM:DD HH:MM:SS` EXIF date.
pub fn parse_exif_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    let shape_ok = text.len() == 19
        && text.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b':',
            10 => b == b' ',
            13 | 16 => b == b':',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return None;
    }
    NaiveDateTime::parse_from_str(text, EXIF_DATE_FORMAT).ok()
}

/// Pick the capture time: DateTimeOriginal, then DateTimeDigitized, then DateTime.
/// The first one that parses wins.
pub fn select_timestamp(record: &DateTimeRecord) -> Option<CaptureTime> {
    [
        (&record.date_time_original, DateTimeSource::DateTimeOriginal),
        (&record.date_time_digitized, DateTimeSource::DateTimeDigitized),
        (&record.date_time, DateTimeSource::DateTime),
    ]
    .into_iter()
    .find_map(|(text, source)| {
        let value = parse_exif_datetime(text.as_deref()?)?;
        Some(CaptureTime { value, source })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::ifd::fixture::svalbard;
    use crate::geo::Hemisphere;
    use tempfile::TempDir;

    fn write_plain_jpeg(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        image::RgbImage::from_pixel(16, 8, image::Rgb([40, 90, 200]))
            .save(&path)
            .unwrap();
        path
    }

    // ── gps_from_record ─────────────────────────────────────────────

    #[test]
    fn svalbard_block_normalizes() {
        let outcome = walk(&svalbard(false));
        let gps = gps_from_record(&outcome.gps).unwrap();
        assert!((gps.latitude - 78.221_183_33).abs() < 1e-6);
        assert!((gps.longitude - 15.639_725).abs() < 1e-6);
        assert_eq!(gps.altitude, Some(425.0));
    }

    #[test]
    fn all_four_gps_fields_are_required() {
        let full = walk(&svalbard(true)).gps;

        let missing_lon = GpsRecord { longitude: None, ..full.clone() };
        assert_eq!(missing_lon.latitude_ref, Some(Hemisphere::North));
        assert!(gps_from_record(&missing_lon).is_none());

        let missing_ref = GpsRecord { longitude_ref: None, ..full.clone() };
        assert!(gps_from_record(&missing_ref).is_none());

        let missing_lat = GpsRecord { latitude: None, ..full };
        assert!(gps_from_record(&missing_lat).is_none());
    }

    #[test]
    fn out_of_range_position_is_absent() {
        let record = GpsRecord {
            latitude_ref: Some(Hemisphere::North),
            latitude: Some(vec![95.0, 0.0, 0.0]),
            longitude_ref: Some(Hemisphere::East),
            longitude: Some(vec![10.0, 0.0, 0.0]),
            ..Default::default()
        };
        assert!(gps_from_record(&record).is_none());
    }

    #[test]
    fn altitude_below_sea_level_is_negative() {
        let record = GpsRecord {
            latitude_ref: Some(Hemisphere::South),
            latitude: Some(vec![31.0, 30.0, 0.0]),
            longitude_ref: Some(Hemisphere::West),
            longitude: Some(vec![35.0, 30.0, 0.0]),
            altitude_ref: Some(1),
            altitude: Some(430.5),
            bearing: Some(f64::NAN),
            accuracy: Some(5.0),
        };
        let gps = gps_from_record(&record).unwrap();
        assert_eq!(gps.latitude, -31.5);
        assert_eq!(gps.longitude, -35.5);
        assert_eq!(gps.altitude, Some(-430.5));
        assert_eq!(gps.bearing, None);
        assert_eq!(gps.accuracy, Some(5.0));
    }

    // ── timestamps ──────────────────────────────────────────────────

    #[test]
    fn original_beats_plain_date_time() {
        let record = DateTimeRecord {
            date_time: Some("2024:01:01 00:00:00".into()),
            date_time_original: Some("2024:03:05 10:15:00".into()),
            date_time_digitized: None,
        };
        let ts = select_timestamp(&record).unwrap();
        assert_eq!(ts.source, DateTimeSource::DateTimeOriginal);
        assert_eq!(ts.value.to_string(), "2024-03-05 10:15:00");
    }

    #[test]
    fn unparseable_fields_fall_through() {
        let record = DateTimeRecord {
            date_time: Some("2021:06:30 23:59:59".into()),
            date_time_original: Some("    :  :     :  :  ".into()),
            date_time_digitized: Some("2024-03-05T10:15:00".into()),
        };
        let ts = select_timestamp(&record).unwrap();
        assert_eq!(ts.source, DateTimeSource::DateTime);

        assert!(select_timestamp(&DateTimeRecord::default()).is_none());
    }

    #[test]
    fn datetime_pattern_is_literal() {
        assert!(parse_exif_datetime("2024:03:05 10:15:00").is_some());
        assert!(parse_exif_datetime("2024:03:05 10:15:00 ").is_some());
        assert!(parse_exif_datetime("2024:3:5 10:15:00").is_none());
        assert!(parse_exif_datetime("2024:13:05 10:15:00").is_none());
        assert!(parse_exif_datetime("0000:00:00 00:00:00").is_none());
        assert!(parse_exif_datetime("").is_none());
    }

    // ── extract ─────────────────────────────────────────────────────

    #[test]
    fn extract_missing_file_is_io_error() {
        let err = extract(Path::new("/nonexistent/photo.jpg")).unwrap_err();
        assert!(matches!(err, GeotagError::Io { .. }));
    }

    #[test]
    fn extract_garbage_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(extract(&path).is_err());
    }

    #[test]
    fn extract_jpeg_without_exif() {
        let dir = TempDir::new().unwrap();
        let path = write_plain_jpeg(&dir, "plain.jpg");

        let result = extract(&path).unwrap();
        assert_eq!((result.width, result.height), (16, 8));
        assert_eq!(result.format.as_deref(), Some("Jpeg"));
        assert!(!result.has_alpha);
        assert!(result.gps.is_none());
        assert!(result.timestamp.is_none());
    }

    #[cfg(feature = "native-write")]
    fn embed_exif(path: &Path, tiff: Vec<u8>) {
        use img_parts::jpeg::Jpeg;
        use img_parts::{Bytes, ImageEXIF};

        let bytes = std::fs::read(path).unwrap();
        let mut jpeg = Jpeg::from_bytes(Bytes::from(bytes)).unwrap();
        jpeg.set_exif(Some(Bytes::from(tiff)));
        std::fs::write(path, jpeg.encoder().bytes()).unwrap();
    }

    #[cfg(feature = "native-write")]
    #[test]
    fn extract_jpeg_with_gps_and_dates() {
        let dir = TempDir::new().unwrap();
        let path = write_plain_jpeg(&dir, "svalbard.jpg");
        embed_exif(&path, svalbard(false));

        let result = extract(&path).unwrap();
        assert!(result.has_exif);
        assert_eq!((result.width, result.height), (16, 8));

        let gps = result.gps.unwrap();
        assert!((gps.latitude - 78.221_183_33).abs() < 1e-6);
        assert!((gps.longitude - 15.639_725).abs() < 1e-6);
        assert_eq!(gps.timestamp.as_deref(), Some("2024:03:05 10:15:00"));

        let ts = result.timestamp.unwrap();
        assert_eq!(ts.source, DateTimeSource::DateTimeOriginal);
    }

    #[cfg(feature = "native-write")]
    #[test]
    fn corrupt_exif_keeps_container_metadata() {
        let dir = TempDir::new().unwrap();
        let path = write_plain_jpeg(&dir, "corrupt.jpg");
        let mut tiff = svalbard(true);
        // First-directory offset far past the end of the block.
        tiff[4..8].copy_from_slice(&0x00FF_FFFFu32.to_be_bytes());
        embed_exif(&path, tiff);

        let result = extract(&path).unwrap();
        assert_eq!((result.width, result.height), (16, 8));
        assert!(result.has_exif);
        assert!(result.gps.is_none());
        assert!(result.timestamp.is_none());
    }
}
