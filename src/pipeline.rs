use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::OutputConfig;
use crate::exif::{CaptureTime, DateTimeSource, MetadataResult};
use crate::geo;
use crate::writeback::{GpsWriter, WriteOutcome};

/// Extensions of files that may carry an EXIF block.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "tiff", "tif", "png", "webp", "avif", "heif", "heic",
    // RAW
    "dng", "cr2", "cr3", "nef", "arw", "orf", "rw2", "raf", "pef", "srw",
];

/// Container family of an image, determined by its extension.
///
/// Only [`ImageKind::Jpeg`] can be geotagged in-process; everything else is
/// left to exiftool.
///
/// # Example
///
/// ```rust
/// use photo_geotag::pipeline::ImageKind;
/// use std::path::Path;
///
/// assert_eq!(ImageKind::from_path(Path::new("photo.JPG")), Some(ImageKind::Jpeg));
/// assert!(ImageKind::from_path(Path::new("shot.nef")).unwrap().is_raw());
/// assert_eq!(ImageKind::from_path(Path::new("notes.txt")), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageKind {
    Jpeg,
    Png,
    WebP,
    Tiff,
    /// HEIC/HEIF/AVIF
    Heif,
    /// Camera RAW (DNG, CR2, NEF, ...)
    Raw,
}

impl ImageKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "tif" | "tiff" => Some(Self::Tiff),
            "heic" | "heif" | "avif" => Some(Self::Heif),
            "dng" | "cr2" | "cr3" | "nef" | "arw" | "orf" | "rw2" | "raf" | "pef" | "srw" => {
                Some(Self::Raw)
            }
            _ => None,
        }
    }

    pub fn is_raw(self) -> bool {
        self == Self::Raw
    }
}

/// Result of geotagging one file.
#[derive(Debug, Clone, Serialize)]
pub struct GeotagResult {
    pub path: PathBuf,
    /// Where the geotagged image was (or would be) stored.
    pub target: PathBuf,
    pub dry_run: bool,
    /// Backup of the original, when one was made.
    pub backup: Option<PathBuf>,
    /// `None` for a dry run.
    pub outcome: Option<WriteOutcome>,
}

impl GeotagResult {
    pub fn written(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.written)
    }
}

/// Collect supported image files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks). Only files with supported image extensions
/// are included.
///
/// # Example
///
/// ```rust,no_run
/// use photo_geotag::pipeline::collect_images;
/// use std::path::PathBuf;
///
/// let images = collect_images(&[
///     PathBuf::from("photo.jpg"),       // single file
///     PathBuf::from("./photos/"),        // entire directory
/// ]);
/// println!("Found {} images", images.len());
/// ```
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.is_file() && is_supported_image(p))
                .collect();
            found.sort();
            log::debug!("{}: {} image(s)", path.display(), found.len());
            images.extend(found);
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

/// Check if a file has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Copy `path` to `<path>.<ext>.bak` unless that backup already exists.
pub fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}

/// Capture time of an extracted image, falling back to the file's
/// modification time when no EXIF date parses.
pub fn capture_time(path: &Path, metadata: &MetadataResult) -> Option<CaptureTime> {
    if let Some(ts) = &metadata.timestamp {
        return Some(ts.clone());
    }
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let local: chrono::DateTime<chrono::Local> = modified.into();
    Some(CaptureTime {
        value: local.naive_local(),
        source: DateTimeSource::FileModified,
    })
}

/// Geotag a single file.
///
/// Writes to `output` when given, otherwise in place. An in-place write is
/// preceded by a backup when `backup_originals` is set. With `dry_run` nothing
/// is touched, but the coordinates are still validated.
///
/// # Example
///
/// ```rust,no_run
/// use photo_geotag::config::Config;
/// use photo_geotag::pipeline::geotag_file;
/// use photo_geotag::writeback::GpsWriter;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load(None)?;
/// let writer = GpsWriter::from_config(&config.write);
/// let photo = Path::new("photo.jpg");
/// let result = geotag_file(photo, 48.8584, 2.2945, None, &writer, &config.output).await?;
/// println!("written: {}", result.written());
/// # Ok(())
/// # }
/// ```
pub async fn geotag_file(
    path: &Path,
    latitude: f64,
    longitude: f64,
    output: Option<&Path>,
    writer: &GpsWriter,
    options: &OutputConfig,
) -> Result<GeotagResult> {
    geo::validate(latitude, longitude)?;

    let target = output.unwrap_or(path).to_path_buf();
    let mut result = GeotagResult {
        path: path.to_path_buf(),
        target,
        dry_run: options.dry_run,
        backup: None,
        outcome: None,
    };

    if options.dry_run {
        log::info!(
            "[dry run] would write GPS {latitude:.6}, {longitude:.6} to {}",
            result.target.display()
        );
        return Ok(result);
    }

    if output.is_none() && options.backup_originals {
        result.backup = Some(backup_file(path)?);
    }

    let outcome = writer.write_gps(path, latitude, longitude, output).await?;
    result.outcome = Some(outcome);
    Ok(result)
}
