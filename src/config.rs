use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
///
/// Controls which GPS write strategies are used and how files are handled
/// (dry run, backups).
///
/// # Loading
///
/// ```rust,no_run
/// use photo_geotag::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.write.exiftool_path = "/opt/homebrew/bin/exiftool".into();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// GPS write strategies.
    pub write: WriteConfig,
    /// Output behavior (dry run, backups).
    pub output: OutputConfig,
}

/// Which GPS write strategies to chain, in order: in-process rewrite, then exiftool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Try the in-process EXIF rewrite first (JPEG only).
    pub native_enabled: bool,
    /// Fall back to exiftool.
    pub exiftool_enabled: bool,
    /// exiftool executable name or path.
    pub exiftool_path: String,
    /// Seconds before an exiftool run is killed and counted as failed.
    pub exiftool_timeout_secs: u64,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, report what would be written without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` backup before modifying an image in place.
    pub backup_originals: bool,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            native_enabled: true,
            exiftool_enabled: true,
            exiftool_path: "exiftool".to_string(),
            exiftool_timeout_secs: 30,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup_originals: true,
        }
    }
}

impl Config {
    /// Default config location: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
