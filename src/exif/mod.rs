//! EXIF GPS and date/time reading, and in-process GPS writing.
//!
//! - [`extract`]: container metadata plus GPS position and capture time of an image
//! - [`walk`]: decode a raw TIFF/EXIF block into GPS and date/time records
//! - `NativeGpsWriter`: rewrite the EXIF block of a JPEG in place (feature `native-write`)
//!
//! Reading never fails on malformed metadata: bad headers, out-of-bounds
//! offsets and unreadable tags are reported as [`Diagnostic`]s and the rest
//! of the block is still decoded.

pub mod bytes;
pub mod ifd;
mod reader;
pub mod tags;
#[cfg(feature = "native-write")]
mod writer;

pub use ifd::{Diagnostic, DiagnosticKind, DirectoryEntry, WalkOutcome, walk};
pub use reader::{
    CaptureTime, DateTimeSource, MetadataResult, extract, gps_from_record, parse_exif_datetime,
    select_timestamp,
};
pub use tags::{DateTimeRecord, GpsRecord};
#[cfg(feature = "native-write")]
pub use writer::{NativeGpsWriter, build_gps_exif};
