//! # photo-geotag
//!
//! Read GPS position and capture time from the EXIF block of photos, and write
//! GPS coordinates back into them.
//!
//! ## Reading
//!
//! ```rust,no_run
//! use photo_geotag::exif::extract;
//! use photo_geotag::pipeline::collect_images;
//! use std::path::PathBuf;
//!
//! fn main() -> anyhow::Result<()> {
//!     for path in collect_images(&[PathBuf::from("./photos")]) {
//!         let meta = extract(&path)?;
//!         match meta.gps {
//!             Some(gps) => {
//!                 println!("{}: {:.6}, {:.6}", path.display(), gps.latitude, gps.longitude)
//!             }
//!             None => println!("{}: no GPS", path.display()),
//!         }
//!         if let Some(diagnostics) = meta.exif.map(|e| e.diagnostics) {
//!             for d in diagnostics {
//!                 println!("  {:?} at offset {}", d.kind, d.offset);
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Raw TIFF/EXIF blocks can be decoded directly with [`exif::walk`], which never
//! fails: structural problems come back as diagnostics next to whatever was
//! decoded.
//!
//! ## Writing
//!
//! ```rust,no_run
//! use photo_geotag::config::Config;
//! use photo_geotag::writeback::GpsWriter;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let writer = GpsWriter::from_config(&config.write);
//!
//!     let outcome = writer
//!         .write_gps(Path::new("photo.jpg"), 78.2212, 15.6397, Some(Path::new("tagged.jpg")))
//!         .await?;
//!     println!("written: {} via {:?}", outcome.written, outcome.strategy);
//!     Ok(())
//! }
//! ```
//!
//! ## Write strategies
//!
//! | Strategy | Formats | Needs |
//! |----------|---------|-------|
//! | `native` | JPEG | feature `native-write` (default) |
//! | `exiftool` | everything exiftool supports, RAW included | `exiftool` on `PATH` |
//!
//! ## Modules
//!
//! - [`config`]: configuration types and loading/saving
//! - [`error`]: the library error type
//! - [`exif`]: EXIF block decoding and metadata extraction
//! - [`exiftool`]: the exiftool write strategy
//! - [`geo`]: coordinate conversion and validation
//! - [`pipeline`]: image collection, format detection, backups and per-file geotagging
//! - [`writeback`]: the GPS write coordinator and strategy trait

pub mod config;
pub mod error;
pub mod exif;
pub mod exiftool;
pub mod geo;
pub mod pipeline;
pub mod writeback;

pub use error::GeotagError;
pub use geo::GeoCoordinate;
pub use writeback::{GpsWriter, WriteOutcome};
