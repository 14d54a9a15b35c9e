use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embed::{self, read_embedded};
use crate::format::{ImageFormat, MediaFamily, media_type_for_path};
use crate::record::ProvenanceRecord;

/// An image as it travels through [`embed`]: raw container bytes plus the declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ImageBuffer {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }
}

/// Format handler contract: original bytes in, new bytes out, or an error for any anomaly.
type Handler = fn(&[u8], &ProvenanceRecord) -> Result<Vec<u8>>;

fn handler_for(format: ImageFormat) -> Option<Handler> {
    match format {
        ImageFormat::Jpeg => Some(embed::inject_exif as Handler),
        ImageFormat::Png => Some(embed::inject_png_text as Handler),
        ImageFormat::WebpSimple => Some(embed::inject_webp_simple as Handler),
        ImageFormat::WebpExtended => Some(embed::inject_webp_extended as Handler),
        ImageFormat::Unsupported => None,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Embed provenance into an image, failing open.
///
/// The declared media type picks the format family and the leading bytes must agree with it.
/// On success the returned buffer carries the family's canonical media type (`image/jpg`
/// becomes `image/jpeg`). Unknown media types, mismatched signatures, malformed containers and
/// handler panics all yield the input unchanged; this function never fails.
///
/// # Example
///
/// ```rust
/// use provenance_embed::pipeline::{ImageBuffer, embed};
/// use provenance_embed::record::ProvenanceRecord;
///
/// let record = ProvenanceRecord::now("https://example.com/a", "https://cdn.example.com/a.gif");
/// let gif = ImageBuffer::new(b"GIF89a".to_vec(), "image/gif");
/// assert_eq!(embed(gif.clone(), &record), gif);
/// ```
pub fn embed(image: ImageBuffer, record: &ProvenanceRecord) -> ImageBuffer {
    let Some(family) = MediaFamily::from_media_type(&image.media_type) else {
        log::debug!("No metadata handler for media type {:?}", image.media_type);
        return image;
    };

    let format = ImageFormat::sniff(&image.bytes);
    let handler = match handler_for(format) {
        Some(handler) if format.family() == Some(family) => handler,
        _ => {
            log::warn!(
                "Declared {} but content sniffs as {format:?}, leaving image unchanged",
                image.media_type
            );
            return image;
        }
    };

    match catch_unwind(AssertUnwindSafe(|| handler(&image.bytes, record))) {
        Ok(Ok(bytes)) => {
            log::debug!(
                "Embedded provenance into {format:?}: {} -> {} bytes",
                image.bytes.len(),
                bytes.len()
            );
            ImageBuffer::new(bytes, family.canonical_media_type())
        }
        Ok(Err(e)) => {
            log::warn!("Could not embed metadata into {format:?}, keeping original: {e:#}");
            image
        }
        Err(payload) => {
            log::warn!(
                "Metadata handler for {format:?} panicked, keeping original: {}",
                panic_message(payload.as_ref())
            );
            image
        }
    }
}

/// [`embed`] over plain values: returns the (possibly unchanged) bytes and media type.
pub fn embed_bytes(
    bytes: Vec<u8>,
    media_type: &str,
    page_url: &str,
    image_url: &str,
    saved_at: DateTime<FixedOffset>,
) -> (Vec<u8>, String) {
    let record = ProvenanceRecord::new(page_url, image_url, saved_at);
    let out = embed(ImageBuffer::new(bytes, media_type), &record);
    (out.bytes, out.media_type)
}

/// The result of running one file through [`process_file`].
#[derive(Debug, Default)]
pub struct ProcessResult {
    pub path: PathBuf,
    /// Media type declared from the file extension.
    pub media_type: Option<String>,
    /// `true` if the output differs from the input.
    pub embedded: bool,
    /// Set when the format is disabled in config.
    pub skipped: bool,
    /// Output equals input because the file already carries this page URL.
    pub already_present: bool,
    /// Where the output was (or, in dry-run mode, would be) written.
    pub output_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Collect supported image files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks). Only `.jpg`, `.jpeg`, `.png` and `.webp` files are kept.
///
/// # Example
///
/// ```rust,no_run
/// use provenance_embed::pipeline::collect_images;
/// use std::path::PathBuf;
///
/// let images = collect_images(&[
///     PathBuf::from("photo.jpg"),       // single file
///     PathBuf::from("./downloads/"),    // entire directory
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
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

/// Check if a file has a supported image extension.
fn is_supported_image(path: &Path) -> bool {
    media_type_for_path(path).is_some()
}

/// Create a backup of the original file.
fn backup_file(path: &Path) -> Result<PathBuf> {
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

/// Where the embedded copy of `path` goes: into `output_dir` when configured, else in place.
fn output_path_for(path: &Path, config: &Config) -> Result<PathBuf> {
    match &config.output.output_dir {
        Some(dir) => {
            let name = path.file_name().context("Input path has no file name")?;
            Ok(Path::new(dir).join(name))
        }
        None => Ok(path.to_path_buf()),
    }
}

/// Embed provenance into a single image file.
///
/// Reads the file, declares its media type from the extension, runs [`embed`] and writes the
/// result either in place (after an optional `.bak` copy) or into `output.output_dir`. Files
/// whose format is disabled in config are skipped, and dry-run mode never touches the disk.
///
/// # Example
///
/// ```rust,no_run
/// use chrono::Local;
/// use provenance_embed::config::Config;
/// use provenance_embed::pipeline::process_file;
/// use std::path::Path;
///
/// let config = Config::default();
/// let result = process_file(
///     Path::new("photo.jpg"),
///     "https://example.com/gallery",
///     "https://cdn.example.com/photo.jpg",
///     Local::now().fixed_offset(),
///     &config,
/// );
/// if let Some(ref err) = result.error {
///     eprintln!("{err}");
/// }
/// ```
pub fn process_file(
    path: &Path,
    page_url: &str,
    image_url: &str,
    saved_at: DateTime<FixedOffset>,
    config: &Config,
) -> ProcessResult {
    let mut result = ProcessResult {
        path: path.to_path_buf(),
        ..Default::default()
    };

    let Some(media_type) = media_type_for_path(path) else {
        result.error = Some("Unsupported file extension".to_string());
        return result;
    };
    result.media_type = Some(media_type.to_string());

    if let Some(family) = MediaFamily::from_media_type(media_type) {
        if !config.formats.is_enabled(family) {
            log::info!("  {media_type} disabled in config, skipping");
            result.skipped = true;
            return result;
        }
    }

    let original = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            result.error = Some(format!("Failed to read file: {e}"));
            return result;
        }
    };

    let record = ProvenanceRecord::new(page_url, image_url, saved_at);
    let output = embed(ImageBuffer::new(original.clone(), media_type), &record);
    result.embedded = output.bytes != original;
    if !result.embedded {
        let existing = read_embedded(&original).ok().and_then(|meta| meta.source);
        if existing.as_deref() == Some(page_url) {
            log::info!("  Provenance already present in {}", path.display());
            result.already_present = true;
        } else {
            log::warn!("  No metadata embedded, leaving {} untouched", path.display());
        }
        return result;
    }

    let target = match output_path_for(path, config) {
        Ok(target) => target,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };
    result.output_path = Some(target.clone());

    if config.output.dry_run {
        log::info!(
            "  Would write {} bytes to {}",
            output.bytes.len(),
            target.display()
        );
        return result;
    }

    if let Err(e) = write_output(path, &target, &output.bytes, config, &mut result) {
        result.error = Some(format!("{e:#}"));
    }

    result
}

fn write_output(
    path: &Path,
    target: &Path,
    bytes: &[u8],
    config: &Config,
    result: &mut ProcessResult,
) -> Result<()> {
    if target == path {
        if config.output.backup_originals {
            result.backup_path = Some(backup_file(path)?);
        }
    } else if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    std::fs::write(target, bytes)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    log::debug!("Wrote {} bytes to {}", bytes.len(), target.display());
    Ok(())
}
