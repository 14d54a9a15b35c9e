use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use clap::Parser;
use std::path::{Path, PathBuf};

use provenance_embed::embed::{EmbeddedMetadata, read_embedded};
use provenance_embed::{config, pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "provenance-embed",
    version,
    about = "Embed source page, image URL and save time into JPEG, PNG and WebP metadata"
)]
struct Cli {
    /// Image files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Page the images were saved from
    #[arg(long, value_name = "URL")]
    page_url: Option<String>,

    /// The image's own URL (default: the file path)
    #[arg(long, value_name = "URL")]
    image_url: Option<String>,

    /// Save time as RFC 3339 (default: now, local time)
    #[arg(long, value_name = "TIME", value_parser = parse_saved_at)]
    saved_at: Option<DateTime<FixedOffset>>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Preview changes without writing to files
    #[arg(long)]
    dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Display embedded provenance and exit
    #[arg(long)]
    show: bool,
}

fn parse_saved_at(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
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

    let images = pipeline::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }

    // Handle --show
    if cli.show {
        let mut shown = Vec::new();
        for image_path in &images {
            let bytes = std::fs::read(image_path)
                .with_context(|| format!("Failed to read {}", image_path.display()))?;
            match read_embedded(&bytes) {
                Ok(meta) if cli.json => shown.push(serde_json::json!({
                    "path": image_path.display().to_string(),
                    "metadata": meta,
                })),
                Ok(meta) => print_embedded(image_path, &meta),
                Err(e) => log::error!("Failed to read {}: {e}", image_path.display()),
            }
        }
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        return Ok(());
    }

    let page_url = cli
        .page_url
        .as_deref()
        .context("--page-url is required when embedding")?;
    let saved_at = cli.saved_at.unwrap_or_else(|| Local::now().fixed_offset());

    // Load config
    let mut config = config::Config::load(cli.config.as_deref())?;

    // Override dry_run from CLI flag
    if cli.dry_run {
        config.output.dry_run = true;
    }

    log::info!("Found {} image(s) to process", images.len());
    log::info!("Formats: {}", config.formats.enabled_names().join(", "));
    if config.output.dry_run {
        log::info!("DRY RUN: no files will be modified");
    }

    let mut results = Vec::new();
    let total = images.len();

    for (i, image_path) in images.iter().enumerate() {
        log::info!(
            "[{}/{}] Processing: {}",
            i + 1,
            total,
            image_path.display()
        );

        let image_url = cli
            .image_url
            .clone()
            .unwrap_or_else(|| image_path.display().to_string());
        let result = pipeline::process_file(image_path, page_url, &image_url, saved_at, &config);

        if let Some(ref err) = result.error {
            log::error!("  Error: {err}");
        } else if result.embedded {
            if let Some(ref out) = result.output_path {
                log::info!("  Wrote: {}", out.display());
            }
            if let Some(ref backup) = result.backup_path {
                log::info!("  Backup: {}", backup.display());
            }
        }

        results.push(result);
    }

    // JSON output
    if cli.json {
        let json_results: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "path": r.path.display().to_string(),
                    "media_type": r.media_type,
                    "embedded": r.embedded,
                    "skipped": r.skipped,
                    "already_present": r.already_present,
                    "output_path": r.output_path.as_ref().map(|p| p.display().to_string()),
                    "backup_path": r.backup_path.as_ref().map(|p| p.display().to_string()),
                    "error": r.error,
                })
            })
            .collect();

        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }

    // Summary
    let embedded = results.iter().filter(|r| r.embedded).count();
    let skipped = results.iter().filter(|r| r.skipped).count();
    let unchanged = results.iter().filter(|r| r.already_present).count();
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    log::info!(
        "Done: {embedded} embedded, {unchanged} already tagged, {skipped} skipped, {failed} failed out of {total} images"
    );

    Ok(())
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print the provenance found in one file.
fn print_embedded(path: &Path, meta: &EmbeddedMetadata) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let fields = [
        ("Source", meta.source.as_deref()),
        ("Description", meta.description.as_deref()),
        ("Created", meta.created.as_deref()),
        ("Comment", meta.comment.as_deref()),
    ];
    if fields.iter().all(|(_, v)| v.is_none()) {
        println!("  {DIM}(no provenance metadata found){RESET}");
    }
    for (tag, val) in fields {
        if let Some(v) = val {
            print_row(tag, v);
        }
    }
    println!();
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
