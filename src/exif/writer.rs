//! In-process GPS write for JPEG.
//!
//! The existing TIFF block is kept byte for byte. A new IFD0 (the old entries
//! plus a GPS pointer) and a fresh GPS directory are appended after it, and
//! the header is pointed at the new IFD0:
//!
//! ```text
//! [old block, padded to even length][new IFD0][GPS IFD][lat rationals][lon rationals]
//! ```
//!
//! Every other offset in the old block stays valid, so the Exif sub-IFD and
//! its dates survive untouched. The old IFD0 and any old GPS directory become
//! unreachable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};

use super::bytes::{ByteOrder, ByteView};
use super::ifd::{
    ENTRY_SIZE, HEADER_SIZE, TAG_GPS_IFD_POINTER, TYPE_ASCII, TYPE_BYTE, TYPE_LONG, TYPE_RATIONAL,
    walk,
};
use super::reader::gps_from_record;
use super::tags::{TAG_GPS_LATITUDE, TAG_GPS_LATITUDE_REF, TAG_GPS_LONGITUDE, TAG_GPS_LONGITUDE_REF};
use crate::geo::{self, Dms, SECONDS_DENOMINATOR};
use crate::pipeline::ImageKind;
use crate::writeback::{GpsWriteRequest, GpsWriteStrategy};

const TAG_GPS_VERSION_ID: u16 = 0x0000;

/// GPSVersionID 2.3.0.0
const GPS_VERSION: [u8; 4] = [2, 3, 0, 0];

const TIFF_MAGIC: u16 = 42;

/// An APP1 segment carries at most 65533 bytes, 6 of them `Exif\0\0`.
const MAX_TIFF_LEN: usize = 65527;

/// Largest drift allowed between requested and re-decoded coordinates.
const VERIFY_TOLERANCE: f64 = 1e-4;

/// Write strategy that rewrites the EXIF block of a JPEG in-process.
///
/// Existing EXIF tags are kept when the block header and IFD0 can be read;
/// otherwise the block is rebuilt from scratch with only the GPS tags.
/// Anything other than a JPEG is declined before the file is touched.
#[derive(Debug, Default)]
pub struct NativeGpsWriter;

impl NativeGpsWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GpsWriteStrategy for NativeGpsWriter {
    fn name(&self) -> &str {
        "native"
    }

    async fn write(&self, request: &GpsWriteRequest) -> Result<()> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || write_gps_to_jpeg(&request))
            .await
            .context("Native GPS writer task panicked")?
    }
}

/// Rewrite `request.source` with new GPS tags and store the result at `request.target`.
fn write_gps_to_jpeg(request: &GpsWriteRequest) -> Result<()> {
    let source = &request.source;
    match ImageKind::from_path(source) {
        Some(ImageKind::Jpeg) => {}
        Some(kind) if kind.is_raw() => {
            anyhow::bail!("RAW files are left to exiftool; in-process write supports JPEG only")
        }
        kind => anyhow::bail!("In-process GPS write supports JPEG only, got {kind:?}"),
    }

    let file_bytes = std::fs::read(source).context("Failed to read image file")?;
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    // Remember where the EXIF segment was originally positioned
    let orig_exif_pos = find_exif_segment_pos(&jpeg);

    let existing = jpeg.exif();
    let tiff_data = build_gps_exif(existing.as_deref(), request.latitude, request.longitude)?;
    verify_gps(&tiff_data, request.latitude, request.longitude)?;

    jpeg.set_exif(Some(Bytes::from(tiff_data)));

    // set_exif() inserts at position 3, which may be after XMP APP1.
    // Move the EXIF segment back so EXIF comes before XMP.
    if let Some(new_pos) = find_exif_segment_pos(&jpeg) {
        let target_pos = orig_exif_pos.unwrap_or(1); // default: right after APP0
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    let output = jpeg.encoder().bytes();
    std::fs::write(&request.target, &output).context("Failed to write JPEG file")?;
    log::debug!("Native GPS write: {}", request.target.display());
    Ok(())
}

/// Build the TIFF data for a JPEG APP1 segment holding the given position.
///
/// `existing` is the current TIFF block of the image (without the `Exif\0\0`
/// prefix). Its tags are kept and its byte order is reused. A missing or
/// unreadable block is replaced by a little-endian one with only GPS tags.
pub fn build_gps_exif(existing: Option<&[u8]>, latitude: f64, longitude: f64) -> Result<Vec<u8>> {
    geo::validate(latitude, longitude)?;

    let parsed = existing.and_then(|block| {
        let view = ByteView::from_marker(block)?;
        let ifd0 = read_first_directory(&view)?;
        Some((block.to_vec(), view.order(), ifd0))
    });
    let (mut out, order, ifd0) = match parsed {
        Some(parsed) => parsed,
        None => {
            if existing.is_some() {
                log::debug!("Existing EXIF block unreadable, writing a GPS-only block");
            }
            let order = ByteOrder::Little;
            let mut header = b"II".to_vec();
            header.extend_from_slice(&order.u16_bytes(TIFF_MAGIC));
            header.extend_from_slice(&order.u32_bytes(0));
            (header, order, FirstDirectory::default())
        }
    };
    // Directories start on a word boundary.
    if out.len() % 2 == 1 {
        out.push(0);
    }

    let ifd0_at = out.len();
    let gps_at = ifd0_at + directory_len(ifd0.entries.len() + 1);

    let mut entries = ifd0.entries;
    entries.push((
        TAG_GPS_IFD_POINTER,
        entry(order, TAG_GPS_IFD_POINTER, TYPE_LONG, 1, order.u32_bytes(offset_u32(gps_at)?)),
    ));
    entries.sort_by_key(|(tag, _)| *tag);
    let raw: Vec<[u8; ENTRY_SIZE]> = entries.into_iter().map(|(_, raw)| raw).collect();
    write_directory(&mut out, order, &raw, ifd0.next);

    out.extend_from_slice(&gps_directory(order, gps_at, latitude, longitude)?);
    out[4..HEADER_SIZE].copy_from_slice(&order.u32_bytes(offset_u32(ifd0_at)?));

    if out.len() > MAX_TIFF_LEN {
        anyhow::bail!("EXIF block of {} bytes does not fit in a JPEG APP1 segment", out.len());
    }
    Ok(out)
}

/// Entries and next-directory offset of an existing IFD0.
#[derive(Debug, Default)]
struct FirstDirectory {
    /// Raw entries keyed by tag, without any GPS pointer.
    entries: Vec<(u16, [u8; ENTRY_SIZE])>,
    next: u32,
}

fn read_first_directory(view: &ByteView<'_>) -> Option<FirstDirectory> {
    let offset = view.u32_at(4)? as usize;
    if offset < HEADER_SIZE {
        return None;
    }
    let count = view.u16_at(offset)? as usize;
    let start = offset + 2;

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let pos = start + i * ENTRY_SIZE;
        let tag = view.u16_at(pos)?;
        let raw: [u8; ENTRY_SIZE] = view.bytes_at(pos, ENTRY_SIZE)?.try_into().ok()?;
        if tag != TAG_GPS_IFD_POINTER {
            entries.push((tag, raw));
        }
    }
    let next = view.u32_at(start + count * ENTRY_SIZE)?;
    Some(FirstDirectory { entries, next })
}

fn directory_len(entries: usize) -> usize {
    2 + entries * ENTRY_SIZE + 4
}

fn entry(order: ByteOrder, tag: u16, field_type: u16, count: u32, value: [u8; 4]) -> [u8; 12] {
    let mut raw = [0u8; ENTRY_SIZE];
    raw[0..2].copy_from_slice(&order.u16_bytes(tag));
    raw[2..4].copy_from_slice(&order.u16_bytes(field_type));
    raw[4..8].copy_from_slice(&order.u32_bytes(count));
    raw[8..12].copy_from_slice(&value);
    raw
}

fn write_directory(out: &mut Vec<u8>, order: ByteOrder, entries: &[[u8; ENTRY_SIZE]], next: u32) {
    // Counts past u16::MAX cannot pass the APP1 size check.
    out.extend_from_slice(&order.u16_bytes(entries.len() as u16));
    for raw in entries {
        out.extend_from_slice(raw);
    }
    out.extend_from_slice(&order.u32_bytes(next));
}

/// GPS directory placed at `at`, followed by the two rational triples it points to.
fn gps_directory(order: ByteOrder, at: usize, latitude: f64, longitude: f64) -> Result<Vec<u8>> {
    let lat = geo::to_dms(latitude, true);
    let lon = geo::to_dms(longitude, false);

    let mut entries = [
        entry(order, TAG_GPS_VERSION_ID, TYPE_BYTE, 4, GPS_VERSION),
        entry(order, TAG_GPS_LATITUDE_REF, TYPE_ASCII, 2, reference_value(&lat)),
        entry(order, TAG_GPS_LATITUDE, TYPE_RATIONAL, 3, [0; 4]),
        entry(order, TAG_GPS_LONGITUDE_REF, TYPE_ASCII, 2, reference_value(&lon)),
        entry(order, TAG_GPS_LONGITUDE, TYPE_RATIONAL, 3, [0; 4]),
    ];
    let lat_at = at + directory_len(entries.len());
    let lon_at = lat_at + 24;
    entries[2][8..12].copy_from_slice(&order.u32_bytes(offset_u32(lat_at)?));
    entries[4][8..12].copy_from_slice(&order.u32_bytes(offset_u32(lon_at)?));

    let mut out = Vec::with_capacity(directory_len(entries.len()) + 48);
    write_directory(&mut out, order, &entries, 0);
    out.extend_from_slice(&encode_gps_rational(order, &lat));
    out.extend_from_slice(&encode_gps_rational(order, &lon));
    Ok(out)
}

fn offset_u32(offset: usize) -> Result<u32> {
    u32::try_from(offset).context("EXIF offset does not fit in 32 bits")
}

/// `N\0`, `S\0`, `E\0` or `W\0`, stored inline.
fn reference_value(dms: &Dms) -> [u8; 4] {
    [dms.hemisphere.as_char() as u8, 0, 0, 0]
}

/// Encode degrees/minutes/seconds as 3 rationals (24 bytes).
fn encode_gps_rational(order: ByteOrder, dms: &Dms) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(24);
    for (num, den) in [
        (dms.degrees, 1),
        (dms.minutes, 1),
        (dms.seconds_numerator(), SECONDS_DENOMINATOR),
    ] {
        bytes.extend_from_slice(&order.u32_bytes(num));
        bytes.extend_from_slice(&order.u32_bytes(den));
    }
    bytes
}

/// Decode the freshly built block and make sure it holds the requested position.
fn verify_gps(tiff_data: &[u8], latitude: f64, longitude: f64) -> Result<()> {
    let outcome = walk(tiff_data);
    let decoded =
        gps_from_record(&outcome.gps).context("Rewritten EXIF has no readable GPS position")?;
    if (decoded.latitude - latitude).abs() > VERIFY_TOLERANCE
        || (decoded.longitude - longitude).abs() > VERIFY_TOLERANCE
    {
        anyhow::bail!(
            "Rewritten EXIF decodes to {}, {} instead of {latitude}, {longitude}",
            decoded.latitude,
            decoded.longitude
        );
    }
    Ok(())
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    const EXIF_PREFIX: &[u8] = b"Exif\0\0";
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}
