use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use photo_geotag::exif::{self, MetadataResult};
use photo_geotag::writeback::GpsWriter;
use photo_geotag::{config, pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "photo-geotag",
    version,
    about = "Show the GPS position and capture time stored in photos, or write GPS coordinates into them"
)]
struct Cli {
    /// Image files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Latitude to write, in decimal degrees (south is negative)
    #[arg(long, value_name = "DEG", allow_negative_numbers = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude to write, in decimal degrees (west is negative)
    #[arg(long, value_name = "DEG", allow_negative_numbers = true, requires = "lat")]
    lon: Option<f64>,

    /// Write the geotagged image here instead of modifying the input
    #[arg(short, long, value_name = "FILE", requires = "lat")]
    output: Option<PathBuf>,

    /// Preview changes without writing to files
    #[arg(long)]
    dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.output.dry_run = true;
    }

    match (cli.lat, cli.lon) {
        (Some(lat), Some(lon)) => write_gps(&cli, &config, lat, lon).await,
        _ => show(&cli),
    }
}

async fn write_gps(cli: &Cli, config: &config::Config, lat: f64, lon: f64) -> Result<()> {
    let images = pipeline::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }
    if cli.output.is_some() && images.len() > 1 {
        anyhow::bail!("--output needs exactly one input image, found {}", images.len());
    }

    let writer = GpsWriter::from_config(&config.write);
    if writer.strategy_names().is_empty() {
        anyhow::bail!(
            "No GPS write strategy enabled. Enable \"native_enabled\" or \"exiftool_enabled\" in config.json."
        );
    }
    log::info!("Write chain: {}", writer.strategy_names().join(" → "));
    if config.output.dry_run {
        log::info!("DRY RUN: no files will be modified");
    }

    let total = images.len();
    let mut results = Vec::new();
    let mut errors = 0;

    for (i, image_path) in images.iter().enumerate() {
        log::info!("[{}/{}] Geotagging: {}", i + 1, total, image_path.display());

        match pipeline::geotag_file(
            image_path,
            lat,
            lon,
            cli.output.as_deref(),
            &writer,
            &config.output,
        )
        .await
        {
            Ok(result) => {
                if let Some(ref backup) = result.backup {
                    log::info!("  Backup: {}", backup.display());
                }
                if let Some(ref outcome) = result.outcome {
                    if !outcome.written {
                        for failure in &outcome.failures {
                            log::error!("  {failure}");
                        }
                    }
                }
                results.push(result);
            }
            Err(e) => {
                log::error!("  Error: {e:#}");
                errors += 1;
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    let written = results.iter().filter(|r| r.written()).count();
    let failed = errors + results.iter().filter(|r| !r.dry_run && !r.written()).count();
    log::info!("Done: {written} written, {failed} failed out of {total} images");

    if failed > 0 {
        anyhow::bail!("{failed} image(s) could not be geotagged");
    }
    Ok(())
}

fn show(cli: &Cli) -> Result<()> {
    let images = pipeline::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }

    let mut results = Vec::new();
    let mut failed = 0;
    for image_path in &images {
        match exif::extract(image_path) {
            Ok(mut meta) => {
                meta.timestamp = pipeline::capture_time(image_path, &meta);
                if !cli.json {
                    print_metadata(&meta);
                }
                results.push(meta);
            }
            Err(e) => {
                log::error!("{e}");
                failed += 1;
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    let with_gps = results.iter().filter(|r| r.gps.is_some()).count();
    log::info!(
        "Done: {} read ({with_gps} with GPS), {failed} failed out of {} images",
        results.len(),
        images.len()
    );

    if failed > 0 {
        anyhow::bail!("{failed} image(s) could not be read");
    }
    Ok(())
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print extracted metadata for one file, organized by section.
fn print_metadata(meta: &MetadataResult) {
    println!();
    println!("{BOLD}File:{RESET} {}", meta.path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    section("Image");
    if let Some(ref format) = meta.format {
        print_row("Format", format);
    }
    print_row("ImageSize", &format!("{} x {}", meta.width, meta.height));
    print_row("ColorType", &meta.color_type);
    print_row("Alpha", yes_no(meta.has_alpha));
    if let Some(orientation) = meta.orientation {
        print_row("Orientation", &orientation.to_string());
    }
    print_row("ICCProfile", yes_no(meta.has_icc_profile));
    print_row("EXIF", yes_no(meta.has_exif));
    println!();

    section("GPS");
    match meta.gps {
        Some(ref gps) => {
            print_value("GPSLatitude", &format!("{:.6}", gps.latitude));
            print_value("GPSLongitude", &format!("{:.6}", gps.longitude));
            if let Some(alt) = gps.altitude {
                print_row("GPSAltitude", &format!("{alt:.1} m"));
            }
            if let Some(bearing) = gps.bearing {
                print_row("GPSImgDirection", &format!("{bearing:.1}°"));
            }
            if let Some(accuracy) = gps.accuracy {
                print_row("GPSHPositioningError", &format!("{accuracy:.1} m"));
            }
        }
        None => println!("  {DIM}(no GPS position){RESET}"),
    }
    println!();

    section("Capture Time");
    match meta.timestamp {
        Some(ref ts) => {
            print_value("Timestamp", &ts.value.format("%Y-%m-%d %H:%M:%S").to_string());
            print_row("Source", &format!("{:?}", ts.source));
        }
        None => println!("  {DIM}(unknown){RESET}"),
    }
    println!();

    let diagnostics = meta.exif.as_ref().map(|e| e.diagnostics.as_slice()).unwrap_or_default();
    if !diagnostics.is_empty() {
        section("Diagnostics");
        for d in diagnostics {
            let tag = d.tag.map(|t| format!(" tag 0x{t:04X}")).unwrap_or_default();
            println!("  {YELLOW}{:?}{RESET} at offset {}{tag}", d.kind, d.offset);
        }
        println!();
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn section(title: &str) {
    println!("  {BOLD}{title}{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(70));
}

/// Print a decoded value row (green).
fn print_value(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    println!("  {GREEN}{tag_col} : {val}{RESET}");
}

/// Print a single row in the metadata display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
