use std::path::PathBuf;

/// Errors surfaced to callers of the library.
///
/// Malformed metadata is never an error (it shows up as a
/// [`Diagnostic`](crate::exif::Diagnostic)); neither is a failed write
/// strategy, which only turns the write outcome into `written: false`.
#[derive(Debug, thiserror::Error)]
pub enum GeotagError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("invalid GPS coordinates ({latitude}, {longitude}): latitude must be within [-90, 90] and longitude within [-180, 180]")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

pub type Result<T> = std::result::Result<T, GeotagError>;
