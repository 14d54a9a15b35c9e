//! # provenance-embed
//!
//! Embed source provenance (the page an image was saved from, the image's own URL, and the save
//! time) directly into JPEG, PNG and WebP files, without re-encoding pixels.
//!
//! ## Quick Start
//!
//! The in-memory engine is [`pipeline::embed`]. It never fails: anything it cannot handle comes
//! back unchanged.
//!
//! ```rust
//! use chrono::DateTime;
//! use provenance_embed::pipeline::{ImageBuffer, embed};
//! use provenance_embed::record::ProvenanceRecord;
//!
//! let saved_at = DateTime::parse_from_rfc3339("2026-01-09T14:30:45+00:00").unwrap();
//! let record = ProvenanceRecord::new(
//!     "https://example.com/a",
//!     "https://cdn.example.com/a.jpg",
//!     saved_at,
//! );
//!
//! let jpeg = vec![0xFF, 0xD8, 0xFF, 0xD9];
//! let out = embed(ImageBuffer::new(jpeg.clone(), "image/jpg"), &record);
//! assert_eq!(out.media_type, "image/jpeg");
//! assert!(out.bytes.len() > jpeg.len());
//! ```
//!
//! ## Working with files
//!
//! ```rust,no_run
//! use chrono::Local;
//! use provenance_embed::config::Config;
//! use provenance_embed::pipeline::{collect_images, process_file};
//! use std::path::PathBuf;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let saved_at = Local::now().fixed_offset();
//!
//!     for path in collect_images(&[PathBuf::from("./downloads")]) {
//!         let image_url = path.display().to_string();
//!         let result = process_file(&path, "https://example.com/gallery", &image_url, saved_at, &config);
//!         if let Some(ref err) = result.error {
//!             eprintln!("Error processing {}: {err}", path.display());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Where provenance goes |
//! |--------|-----------------------|
//! | JPEG (`.jpg`, `.jpeg`) | EXIF APP1: ImageDescription, DateTime, DateTimeOriginal/Digitized, UserComment |
//! | PNG (`.png`) | `tEXt` chunks: `Source`, `Creation Time`, `Comment` |
//! | WebP (`.webp`) | `XMP ` chunk (simple files are upgraded to VP8X) |
//!
//! ## Modules
//!
//! - [`config`]: Configuration types and loading/saving
//! - [`embed`]: Per-format injectors and the metadata reader
//! - [`format`]: Signature sniffing and media types
//! - [`pipeline`]: The fail-open dispatcher and the file pipeline
//! - [`record`]: The provenance record and its timestamp renderings

pub mod config;
pub mod embed;
pub mod format;
pub mod pipeline;
pub mod record;
