use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::WriteConfig;
use crate::error::GeotagError;
use crate::exiftool::ExiftoolWriter;
use crate::geo;

/// One GPS write: read `source`, store the geotagged image at `target`.
///
/// `source` and `target` may be the same path (in-place write).
#[derive(Debug, Clone)]
pub struct GpsWriteRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub latitude: f64,
    pub longitude: f64,
}

/// A way of writing GPS coordinates into an image.
///
/// Strategies are tried in order by [`GpsWriter`]; an `Err` hands the request
/// to the next one. A strategy must not leave `target` half-written when it
/// fails.
#[async_trait]
pub trait GpsWriteStrategy: Send + Sync {
    /// Short name used in logs and outcomes (e.g. "native", "exiftool").
    fn name(&self) -> &str;
    async fn write(&self, request: &GpsWriteRequest) -> Result<()>;
}

/// What happened to a GPS write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteOutcome {
    pub written: bool,
    /// Name of the strategy that succeeded.
    pub strategy: Option<String>,
    /// `"<strategy>: <error>"` for every strategy that failed.
    pub failures: Vec<String>,
}

/// Per-path async locks so two writes never hit the same target at once.
#[derive(Debug, Default)]
struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop locks nobody is holding or waiting on.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Writes GPS coordinates through an ordered chain of strategies.
pub struct GpsWriter {
    strategies: Vec<Box<dyn GpsWriteStrategy>>,
    locks: PathLocks,
}

impl GpsWriter {
    pub fn new(strategies: Vec<Box<dyn GpsWriteStrategy>>) -> Self {
        Self { strategies, locks: PathLocks::default() }
    }

    /// Build the strategy chain from configuration: in-process rewrite first
    /// (when compiled in and enabled), then exiftool.
    pub fn from_config(config: &WriteConfig) -> Self {
        Self::new(build_strategy_chain(config))
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Write `latitude`/`longitude` into `source`, storing the result at
    /// `target` (or over `source` when `target` is `None`).
    ///
    /// Out-of-range coordinates are rejected before any strategy runs. When
    /// every strategy fails the outcome has `written: false`; that is not an
    /// error.
    pub async fn write_gps(
        &self,
        source: &Path,
        latitude: f64,
        longitude: f64,
        target: Option<&Path>,
    ) -> Result<WriteOutcome, GeotagError> {
        geo::validate(latitude, longitude)?;

        let request = GpsWriteRequest {
            source: source.to_path_buf(),
            target: target.unwrap_or(source).to_path_buf(),
            latitude,
            longitude,
        };

        let lock = self.locks.lock_for(&request.target);
        let _guard = lock.lock().await;

        let mut outcome = WriteOutcome::default();
        for strategy in &self.strategies {
            log::debug!("  Trying {} GPS write...", strategy.name());
            match strategy.write(&request).await {
                Ok(()) => {
                    log::info!(
                        "GPS {latitude:.6}, {longitude:.6} written to {} ({})",
                        request.target.display(),
                        strategy.name()
                    );
                    outcome.written = true;
                    outcome.strategy = Some(strategy.name().to_string());
                    return Ok(outcome);
                }
                Err(e) => {
                    log::warn!("  {} GPS write failed: {e:#}", strategy.name());
                    outcome.failures.push(format!("{}: {e:#}", strategy.name()));
                }
            }
        }

        log::error!("All GPS write strategies failed for {}", request.target.display());
        Ok(outcome)
    }
}

/// Assemble the enabled strategies in fallback order.
pub fn build_strategy_chain(config: &WriteConfig) -> Vec<Box<dyn GpsWriteStrategy>> {
    let mut strategies: Vec<Box<dyn GpsWriteStrategy>> = Vec::new();

    if config.native_enabled {
        #[cfg(feature = "native-write")]
        strategies.push(Box::new(crate::exif::NativeGpsWriter::new()));
        #[cfg(not(feature = "native-write"))]
        log::warn!("Native GPS write enabled but not compiled in (feature `native-write`)");
    }

    if config.exiftool_enabled {
        strategies.push(Box::new(ExiftoolWriter::new(
            config.exiftool_path.clone(),
            Duration::from_secs(config.exiftool_timeout_secs),
        )));
    }

    strategies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exiftool::{ToolOutput, ToolRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Strategy that counts calls and either succeeds or fails.
    struct Scripted {
        name: &'static str,
        succeed: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GpsWriteStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn write(&self, _request: &GpsWriteRequest) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed { Ok(()) } else { anyhow::bail!("scripted failure") }
        }
    }

    fn scripted(
        name: &'static str,
        succeed: bool,
    ) -> (Box<dyn GpsWriteStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Box::new(Scripted { name, succeed, calls: calls.clone() }), calls)
    }

    /// Fake exiftool: records every invocation, answers from a script.
    #[derive(Clone, Default)]
    struct FakeExiftool {
        installed: bool,
        edit_succeeds: bool,
        invocations: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl FakeExiftool {
        fn calls(&self) -> Vec<Vec<String>> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolRunner for FakeExiftool {
        async fn run(
            &self,
            _program: &str,
            args: &[String],
            _timeout: Duration,
        ) -> Result<ToolOutput> {
            self.invocations.lock().unwrap().push(args.to_vec());
            if !self.installed {
                anyhow::bail!("No such file or directory");
            }
            if args == ["-ver"] {
                return Ok(ToolOutput {
                    success: true,
                    stdout: "12.76\n".into(),
                    stderr: String::new(),
                });
            }
            Ok(ToolOutput {
                success: self.edit_succeeds,
                stdout: String::new(),
                stderr: if self.edit_succeeds { String::new() } else { "Error: bad file".into() },
            })
        }
    }

    fn exiftool(fake: &FakeExiftool) -> Box<dyn GpsWriteStrategy> {
        let runner = Box::new(fake.clone());
        Box::new(ExiftoolWriter::with_runner("exiftool", Duration::from_secs(5), runner))
    }

    #[tokio::test]
    async fn out_of_range_latitude_rejected_before_any_strategy() {
        let (a, a_calls) = scripted("a", true);
        let writer = GpsWriter::new(vec![a]);

        let err = writer.write_gps(Path::new("photo.jpg"), 91.0, 0.0, None).await.unwrap_err();
        assert!(matches!(
            err,
            GeotagError::InvalidCoordinates { latitude, .. } if latitude == 91.0
        ));
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);

        assert!(writer.write_gps(Path::new("photo.jpg"), 0.0, -180.1, None).await.is_err());
        assert!(writer.write_gps(Path::new("photo.jpg"), f64::NAN, 0.0, None).await.is_err());
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let (a, a_calls) = scripted("a", true);
        let (b, b_calls) = scripted("b", true);
        let writer = GpsWriter::new(vec![a, b]);

        let outcome = writer.write_gps(Path::new("x.jpg"), 10.0, 20.0, None).await.unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.strategy.as_deref(), Some("a"));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_in_order() {
        let (a, a_calls) = scripted("a", false);
        let (b, b_calls) = scripted("b", true);
        let writer = GpsWriter::new(vec![a, b]);

        let outcome = writer.write_gps(Path::new("x.jpg"), 10.0, 20.0, None).await.unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.strategy.as_deref(), Some("b"));
        assert_eq!(outcome.failures, vec!["a: scripted failure".to_string()]);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn total_failure_is_false_not_error() {
        let (a, _) = scripted("a", false);
        let (b, _) = scripted("b", false);
        let writer = GpsWriter::new(vec![a, b]);

        let outcome = writer.write_gps(Path::new("x.jpg"), 10.0, 20.0, None).await.unwrap();
        assert!(!outcome.written);
        assert_eq!(outcome.strategy, None);
        assert_eq!(outcome.failures.len(), 2);
    }

    #[tokio::test]
    async fn missing_exiftool_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("photo.cr2");
        std::fs::write(&source, b"raw").unwrap();

        let fake = FakeExiftool { installed: false, ..Default::default() };
        let writer = GpsWriter::new(vec![exiftool(&fake)]);

        let outcome = writer.write_gps(&source, 1.0, 2.0, None).await.unwrap();
        assert!(!outcome.written);
        // Only the version check ran.
        assert_eq!(fake.calls(), vec![vec!["-ver".to_string()]]);
    }

    #[tokio::test]
    async fn exiftool_copies_then_edits_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("photo.nef");
        let target = dir.path().join("tagged.nef");
        std::fs::write(&source, b"raw bytes").unwrap();

        let fake = FakeExiftool { installed: true, edit_succeeds: true, ..Default::default() };
        let (failing, _) = scripted("native", false);
        let writer = GpsWriter::new(vec![failing, exiftool(&fake)]);

        let outcome = writer.write_gps(&source, -33.8688, 151.2093, Some(&target)).await.unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.strategy.as_deref(), Some("exiftool"));
        assert_eq!(std::fs::read(&target).unwrap(), b"raw bytes");

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        let edit = &calls[1];
        assert_eq!(edit[0], "-overwrite_original");
        assert!(edit.contains(&"-GPSLatitude=33.8688".to_string()));
        assert!(edit.contains(&"-GPSLatitudeRef=S".to_string()));
        assert!(edit.contains(&"-GPSLongitude=151.2093".to_string()));
        assert!(edit.contains(&"-GPSLongitudeRef=E".to_string()));
        assert!(edit.contains(&"-GPSVersionID=2.3.0.0".to_string()));
        let last = PathBuf::from(edit.last().unwrap());
        assert!(last.is_absolute());
        assert!(last.ends_with("tagged.nef"));
    }

    #[tokio::test]
    async fn exiftool_error_exit_is_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("photo.heic");
        std::fs::write(&source, b"heic").unwrap();

        let fake = FakeExiftool { installed: true, edit_succeeds: false, ..Default::default() };
        let writer = GpsWriter::new(vec![exiftool(&fake)]);

        let outcome = writer.write_gps(&source, 1.0, 2.0, None).await.unwrap();
        assert!(!outcome.written);
        assert!(outcome.failures[0].contains("bad file"));
    }

    #[cfg(feature = "native-write")]
    #[tokio::test]
    async fn native_success_never_runs_exiftool() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("photo.jpg");
        image::RgbImage::from_pixel(8, 8, image::Rgb([200, 200, 200])).save(&source).unwrap();

        let fake = FakeExiftool { installed: true, edit_succeeds: true, ..Default::default() };
        let writer = GpsWriter::new(vec![
            Box::new(crate::exif::NativeGpsWriter::new()),
            exiftool(&fake),
        ]);
        assert_eq!(writer.strategy_names(), vec!["native", "exiftool"]);

        let outcome = writer.write_gps(&source, 78.221_183, 15.639_725, None).await.unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.strategy.as_deref(), Some("native"));
        assert!(fake.calls().is_empty());

        let gps = crate::exif::extract(&source).unwrap().gps.unwrap();
        assert!((gps.latitude - 78.221_183).abs() < 1e-4);
        assert!((gps.longitude - 15.639_725).abs() < 1e-4);
    }

    #[test]
    fn same_target_shares_a_lock() {
        let locks = PathLocks::default();
        let a = locks.lock_for(Path::new("photos/a.jpg"));
        let again = locks.lock_for(Path::new("photos/a.jpg"));
        let b = locks.lock_for(Path::new("photos/b.jpg"));
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn chain_follows_config() {
        let mut config = WriteConfig::default();
        config.native_enabled = false;
        let names: Vec<String> = build_strategy_chain(&config)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["exiftool"]);

        config.exiftool_enabled = false;
        assert!(build_strategy_chain(&config).is_empty());
    }
}
