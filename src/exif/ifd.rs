//! Image File Directory walker.
//!
//! Layout of a TIFF/EXIF block:
//!
//! ```text
//! [0..2)  byte-order marker, "II" or "MM"
//! [2..4)  42
//! [4..8)  offset of the first directory
//! dir:    u16 entry count, count × 12-byte entries, u32 next-directory offset
//! entry:  tag u16, type u16, count u32, value-or-offset u32
//! ```
//!
//! Each directory is scanned into its own pair of records; the walk merges
//! them. Offsets already visited are never scanned twice, so cyclic chains
//! terminate.

use serde::Serialize;
use std::collections::HashSet;

use super::bytes::ByteView;
use super::tags::{DateTimeRecord, GpsRecord, decode_date_time, decode_gps};

pub const TYPE_BYTE: u16 = 1;
pub const TYPE_ASCII: u16 = 2;
pub const TYPE_SHORT: u16 = 3;
pub const TYPE_LONG: u16 = 4;
pub const TYPE_RATIONAL: u16 = 5;

/// Exif sub-IFD pointer (IFD0).
pub const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
/// GPS sub-IFD pointer (IFD0).
pub const TAG_GPS_IFD_POINTER: u16 = 0x8825;

pub const ENTRY_SIZE: usize = 12;
pub const HEADER_SIZE: usize = 8;

/// Size in bytes of one value of the given TIFF field type.
fn type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// One 12-byte directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    /// Raw value-or-offset field.
    pub value_offset: u32,
    /// Position of the value-or-offset field inside the block.
    pub field_offset: usize,
}

impl DirectoryEntry {
    /// Read the entry starting at `pos`.
    pub fn read(view: &ByteView<'_>, pos: usize) -> Option<Self> {
        if !view.contains(pos, ENTRY_SIZE) {
            return None;
        }
        Some(Self {
            tag: view.u16_at(pos)?,
            field_type: view.u16_at(pos + 2)?,
            count: view.u32_at(pos + 4)?,
            value_offset: view.u32_at(pos + 8)?,
            field_offset: pos + 8,
        })
    }

    /// Where the entry's payload starts.
    ///
    /// Payloads of four bytes or fewer sit in the value field itself;
    /// everything else is at the absolute offset stored there.
    pub fn payload_offset(&self) -> usize {
        let inline = type_size(self.field_type)
            .and_then(|size| size.checked_mul(self.count as usize))
            .is_some_and(|len| len <= 4);
        if inline {
            self.field_offset
        } else {
            self.value_offset as usize
        }
    }
}

/// What went wrong while decoding part of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    /// Not a TIFF header, or shorter than one.
    BadHeader,
    /// A directory offset points outside the block.
    DirectoryOutOfBounds,
    /// The entry list or next-directory field runs past the end of the block.
    TruncatedDirectory,
    /// A directory offset was reached a second time.
    CyclicOffset,
    /// A tag's value could not be read.
    UnreadableValue,
    /// A GPS reference tag held something other than N/S or E/W.
    BadHemisphere,
}

/// A skipped piece of a block, with enough context to tell it apart from
/// missing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub offset: usize,
    pub tag: Option<u16>,
    pub kind: DiagnosticKind,
}

fn diag(offset: usize, tag: Option<u16>, kind: DiagnosticKind) -> Diagnostic {
    Diagnostic { offset, tag, kind }
}

/// Everything recovered from one block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WalkOutcome {
    pub gps: GpsRecord,
    pub date_time: DateTimeRecord,
    pub diagnostics: Vec<Diagnostic>,
}

/// Scan of a single directory.
#[derive(Debug, Default)]
struct DirectoryScan {
    gps: GpsRecord,
    date_time: DateTimeRecord,
    diagnostics: Vec<Diagnostic>,
    /// Sub-directory and next-directory offsets, in the order they should be visited.
    links: Vec<usize>,
}

/// Walk every directory reachable from the block header.
///
/// Never fails: malformed input yields empty or partial records plus
/// diagnostics.
pub fn walk(data: &[u8]) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();

    let Some(view) = ByteView::from_marker(data) else {
        outcome.diagnostics.push(diag(0, None, DiagnosticKind::BadHeader));
        return outcome;
    };
    let Some(first) = view.u32_at(4).map(|o| o as usize) else {
        outcome.diagnostics.push(diag(0, None, DiagnosticKind::BadHeader));
        return outcome;
    };

    let mut visited = HashSet::new();
    // Depth-first, so chained directories are merged in file order.
    let mut pending = vec![first];

    while let Some(offset) = pending.pop() {
        if offset < HEADER_SIZE || !view.contains(offset, 2) {
            log::debug!("EXIF directory offset {offset:#x} out of bounds");
            outcome.diagnostics.push(diag(offset, None, DiagnosticKind::DirectoryOutOfBounds));
            continue;
        }
        if !visited.insert(offset) {
            log::debug!("EXIF directory offset {offset:#x} already visited");
            outcome.diagnostics.push(diag(offset, None, DiagnosticKind::CyclicOffset));
            continue;
        }

        let scan = scan_directory(&view, offset);
        outcome.gps = outcome.gps.merge(scan.gps);
        outcome.date_time = outcome.date_time.merge(scan.date_time);
        outcome.diagnostics.extend(scan.diagnostics);
        pending.extend(scan.links.into_iter().rev());
    }

    outcome
}

fn scan_directory(view: &ByteView<'_>, offset: usize) -> DirectoryScan {
    let mut scan = DirectoryScan::default();

    let Some(count) = view.u16_at(offset) else {
        return scan;
    };

    let entries_start = offset + 2;
    for i in 0..count as usize {
        let pos = entries_start + i * ENTRY_SIZE;
        let Some(entry) = DirectoryEntry::read(view, pos) else {
            log::debug!("EXIF directory at {offset:#x} truncated after {i} of {count} entries");
            scan.diagnostics.push(diag(pos, None, DiagnosticKind::TruncatedDirectory));
            return scan;
        };

        if let Err(kind) = decode_gps(view, &entry, &mut scan.gps) {
            log::debug!("Skipping GPS tag {:#06x} at {pos:#x}: {kind:?}", entry.tag);
            scan.diagnostics.push(diag(pos, Some(entry.tag), kind));
        }
        if let Err(kind) = decode_date_time(view, &entry, &mut scan.date_time) {
            log::debug!("Skipping date/time tag {:#06x} at {pos:#x}: {kind:?}", entry.tag);
            scan.diagnostics.push(diag(pos, Some(entry.tag), kind));
        }

        if matches!(entry.tag, TAG_EXIF_IFD_POINTER | TAG_GPS_IFD_POINTER) {
            // Pointers are LONG (or IFD type 13), always inline.
            scan.links.push(entry.value_offset as usize);
        }
    }

    let next_field = entries_start + count as usize * ENTRY_SIZE;
    match view.u32_at(next_field) {
        Some(0) => {}
        Some(next) => scan.links.push(next as usize),
        None => {
            scan.diagnostics.push(diag(next_field, None, DiagnosticKind::TruncatedDirectory));
        }
    }

    scan
}
