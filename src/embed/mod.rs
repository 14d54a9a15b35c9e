//! Container-level provenance writers and the matching reader.
//!
//! Each injector takes the original image bytes and a [`ProvenanceRecord`](crate::record::ProvenanceRecord)
//! and returns a new buffer, never touching pixel data:
//!
//! - [`inject_exif`]: JPEG, EXIF APP1 segment with IFD0 and an EXIF sub-IFD
//! - [`inject_png_text`]: PNG, three `tEXt` chunks right after IHDR
//! - [`inject_webp_xmp`]: WebP, an `XMP ` chunk, upgrading simple files to VP8X; split into
//!   [`inject_webp_simple`] and [`inject_webp_extended`] for callers that already sniffed the form
//!
//! Injectors report structural problems as errors. Turning those into a pass-through of the
//! original bytes is the job of [`crate::pipeline::embed`].

pub(crate) mod bytes;
mod crc;
mod jpeg;
mod png;
mod reader;
mod webp;

pub use crc::{crc32, crc32_parts};
pub use jpeg::inject as inject_exif;
pub use png::inject as inject_png_text;
pub use reader::{EmbeddedMetadata, read_embedded};
pub use webp::inject as inject_webp_xmp;
pub use webp::{inject_extended as inject_webp_extended, inject_simple as inject_webp_simple};
