//! GPS write strategy backed by the `exiftool` command-line editor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::geo;
use crate::writeback::{GpsWriteRequest, GpsWriteStrategy};

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external program. Swappable so tests can stand in for exiftool.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`. Failing to start it, or exceeding `timeout`,
    /// is an error; a non-zero exit is reported through [`ToolOutput::success`].
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<ToolOutput>;
}

/// [`ToolRunner`] that spawns a real subprocess, killed if it outlives the timeout.
#[derive(Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<ToolOutput> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| anyhow::anyhow!("{program} timed out after {timeout:?}"))?
            .with_context(|| format!("Failed to run {program}"))?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Fallback strategy: copy the source to the target, then let exiftool edit
/// the target in place.
pub struct ExiftoolWriter {
    program: String,
    timeout: Duration,
    runner: Box<dyn ToolRunner>,
}

impl ExiftoolWriter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self::with_runner(program, timeout, Box::new(ProcessRunner))
    }

    pub fn with_runner(
        program: impl Into<String>,
        timeout: Duration,
        runner: Box<dyn ToolRunner>,
    ) -> Self {
        Self { program: program.into(), timeout, runner }
    }

    /// Check that exiftool is installed; returns its version.
    pub async fn version(&self) -> Result<String> {
        let output = self
            .runner
            .run(&self.program, &["-ver".to_string()], self.timeout)
            .await?;
        if !output.success {
            anyhow::bail!("{} -ver exited with an error: {}", self.program, output.stderr.trim());
        }
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl GpsWriteStrategy for ExiftoolWriter {
    fn name(&self) -> &str {
        "exiftool"
    }

    async fn write(&self, request: &GpsWriteRequest) -> Result<()> {
        let version = self
            .version()
            .await
            .with_context(|| format!("{} is not available", self.program))?;
        log::debug!("Using exiftool {version}");

        if request.source != request.target {
            tokio::fs::copy(&request.source, &request.target)
                .await
                .with_context(|| format!("Failed to copy to {}", request.target.display()))?;
        }

        let target = tokio::fs::canonicalize(&request.target)
            .await
            .with_context(|| format!("Failed to resolve {}", request.target.display()))?;
        let args = gps_args(request.latitude, request.longitude, &target);

        let output = self.runner.run(&self.program, &args, self.timeout).await?;
        if !output.success {
            anyhow::bail!("exiftool failed: {}", output.stderr.trim());
        }
        log::debug!("exiftool: {}", output.stdout.trim());
        Ok(())
    }
}

/// Arguments that set the GPS position of `path`, overwriting the original
/// file instead of leaving a `_original` copy behind.
pub fn gps_args(latitude: f64, longitude: f64, path: &Path) -> Vec<String> {
    let lat = geo::to_dms(latitude, true);
    let lon = geo::to_dms(longitude, false);
    vec![
        "-overwrite_original".to_string(),
        format!("-GPSLatitude={}", latitude.abs()),
        format!("-GPSLatitudeRef={}", lat.hemisphere.as_char()),
        format!("-GPSLongitude={}", longitude.abs()),
        format!("-GPSLongitudeRef={}", lon.hemisphere.as_char()),
        "-GPSVersionID=2.3.0.0".to_string(),
        path.display().to_string(),
    ]
}
