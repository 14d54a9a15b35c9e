//! Container sniffing and media-type mapping.

use std::path::Path;

use crate::embed::bytes::read_u32_be;

const JPEG_SOI: &[u8] = &[0xFF, 0xD8];
const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const RIFF: &[u8] = b"RIFF";
const WEBP: &[u8] = b"WEBP";

/// Container classification derived from a buffer's leading bytes.
///
/// Each supported variant maps to exactly one metadata handler (see
/// [`crate::pipeline::embed`]); `Unsupported` maps to none and the buffer is passed through.
///
/// # Example
///
/// ```rust
/// use provenance_embed::format::ImageFormat;
///
/// assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
/// assert_eq!(ImageFormat::sniff(b"GIF89a"), ImageFormat::Unsupported);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// JPEG: EXIF in an APP1 segment
    Jpeg,
    /// PNG: tEXt chunks after IHDR
    Png,
    /// WebP with a bare `VP8 ` or `VP8L` chunk; upgraded to VP8X on write
    WebpSimple,
    /// WebP already carrying a `VP8X` header
    WebpExtended,
    /// No handler; passed through unchanged
    Unsupported,
}

/// The image chunk that follows the RIFF header of a WebP file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebpSubtype {
    /// Lossy
    Vp8,
    /// Lossless
    Vp8l,
    /// Extended
    Vp8x,
}

/// Format family named by a declared media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFamily {
    Jpeg,
    Png,
    WebP,
}

impl MediaFamily {
    /// Resolve a declared media type. Matching is case-insensitive and ignores parameters.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn canonical_media_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

impl ImageFormat {
    /// Classify a buffer by its signature. Never fails; short or unknown input is `Unsupported`.
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(PNG_SIGNATURE) {
            return Self::Png;
        }
        if data.starts_with(JPEG_SOI) {
            return Self::Jpeg;
        }
        match webp_subtype(data) {
            Some(WebpSubtype::Vp8 | WebpSubtype::Vp8l) => Self::WebpSimple,
            Some(WebpSubtype::Vp8x) => Self::WebpExtended,
            None => Self::Unsupported,
        }
    }

    pub fn family(&self) -> Option<MediaFamily> {
        match self {
            Self::Jpeg => Some(MediaFamily::Jpeg),
            Self::Png => Some(MediaFamily::Png),
            Self::WebpSimple | Self::WebpExtended => Some(MediaFamily::WebP),
            Self::Unsupported => None,
        }
    }
}

/// Sub-type of a RIFF/WebP buffer, read from the chunk tag at offset 12.
pub fn webp_subtype(data: &[u8]) -> Option<WebpSubtype> {
    if data.get(0..4)? != RIFF || data.get(8..12)? != WEBP {
        return None;
    }
    match data.get(12..16)? {
        b"VP8 " => Some(WebpSubtype::Vp8),
        b"VP8L" => Some(WebpSubtype::Vp8l),
        b"VP8X" => Some(WebpSubtype::Vp8x),
        _ => None,
    }
}

/// Declared data length of the IHDR chunk, if `data` is a PNG whose first chunk is IHDR.
pub fn png_ihdr_len(data: &[u8]) -> Option<u32> {
    if !data.starts_with(PNG_SIGNATURE) || data.get(12..16)? != b"IHDR" {
        return None;
    }
    read_u32_be(data, 8)
}

/// Media type to declare for a file, based on its extension.
pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
