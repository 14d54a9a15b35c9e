use anyhow::{Context, Result, bail};
use img_parts::Bytes;
use img_parts::ImageEXIF;
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use nom_exif::*;
use serde::Serialize;
use std::io::Cursor;

use super::bytes::read_u32_le;
use super::png::{KEYWORD_COMMENT, KEYWORD_CREATION_TIME, KEYWORD_SOURCE};
use super::webp::{CHUNK_XMP, chunk_span};
use crate::format::ImageFormat;

/// Provenance found in an image, as written by [`crate::pipeline::embed`].
///
/// Fields the container does not carry stay `None`: PNG has no separate description, JPEG and
/// WebP have no free-form comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbeddedMetadata {
    /// Page URL the image was saved from.
    pub source: Option<String>,
    pub description: Option<String>,
    /// Save time, in the container's own notation.
    pub created: Option<String>,
    pub comment: Option<String>,
}

/// Read back embedded provenance from JPEG (EXIF), PNG (tEXt) or WebP (XMP) bytes.
pub fn read_embedded(data: &[u8]) -> Result<EmbeddedMetadata> {
    match ImageFormat::sniff(data) {
        ImageFormat::Jpeg => read_jpeg(data),
        ImageFormat::Png => read_png(data),
        ImageFormat::WebpSimple | ImageFormat::WebpExtended => read_webp(data),
        ImageFormat::Unsupported => bail!("Unsupported image format"),
    }
}

fn read_jpeg(data: &[u8]) -> Result<EmbeddedMetadata> {
    let jpeg = Jpeg::from_bytes(Bytes::from(data.to_vec()))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;
    if jpeg.exif().is_none() {
        log::debug!("No EXIF segment in JPEG");
        return Ok(EmbeddedMetadata::default());
    }

    let mut parser = MediaParser::new();
    let ms = MediaSource::seekable(Cursor::new(data.to_vec())).context("Failed to open JPEG data")?;
    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(e) => {
            log::debug!("Could not parse EXIF: {e}");
            return Ok(EmbeddedMetadata::default());
        }
    };
    let exif: Exif = iter.into();

    let description = exif.get(ExifTag::ImageDescription).and_then(entry_to_string);
    let created = exif.get(ExifTag::DateTimeOriginal).and_then(entry_to_string);
    let source = description.as_deref().and_then(source_from_description);

    Ok(EmbeddedMetadata {
        source,
        description,
        created,
        comment: None,
    })
}

/// Convert an EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// Page URL out of `"Source: {page} | Image: {image}"`.
fn source_from_description(description: &str) -> Option<String> {
    let rest = description.strip_prefix("Source: ")?;
    let page = rest.split(" | Image: ").next()?;
    Some(page.to_string())
}

fn read_png(data: &[u8]) -> Result<EmbeddedMetadata> {
    let png = Png::from_bytes(Bytes::from(data.to_vec()))
        .map_err(|e| anyhow::anyhow!("Failed to parse PNG: {e}"))?;

    let mut meta = EmbeddedMetadata::default();
    for chunk in png.chunks() {
        if chunk.kind() != *b"tEXt" {
            continue;
        }
        let contents = chunk.contents();
        let Some(split) = contents.iter().position(|&b| b == 0) else {
            continue;
        };
        let keyword = String::from_utf8_lossy(&contents[..split]);
        let text = String::from_utf8_lossy(&contents[split + 1..]).into_owned();
        match keyword.as_ref() {
            KEYWORD_SOURCE => meta.source = Some(text),
            KEYWORD_CREATION_TIME => meta.created = Some(text),
            KEYWORD_COMMENT => meta.comment = Some(text),
            _ => {}
        }
    }
    Ok(meta)
}

fn read_webp(data: &[u8]) -> Result<EmbeddedMetadata> {
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let span = chunk_span(data, pos)
            .with_context(|| format!("WebP chunk at offset {pos} runs past end of data"))?;
        if &data[pos..pos + 4] == CHUNK_XMP {
            let size = read_u32_le(data, pos + 4).context("truncated XMP chunk")? as usize;
            let xmp = String::from_utf8_lossy(&data[pos + 8..pos + 8 + size]);
            return Ok(EmbeddedMetadata {
                source: xml_element_text(&xmp, "dc:source"),
                description: xml_element_raw(&xmp, "dc:description")
                    .and_then(|alt| xml_element_text(alt, "rdf:li")),
                created: xml_element_text(&xmp, "xmp:CreateDate"),
                comment: None,
            });
        }
        pos += span;
    }
    log::debug!("No XMP chunk in WebP");
    Ok(EmbeddedMetadata::default())
}

/// Raw body between `<tag ...>` and `</tag>`, first occurrence.
fn xml_element_raw<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = xml.find(&open)?;
    let body_start = start + xml[start..].find('>')? + 1;
    let body_len = xml[body_start..].find(&close)?;
    Some(&xml[body_start..body_start + body_len])
}

fn xml_element_text(xml: &str, tag: &str) -> Option<String> {
    xml_element_raw(xml, tag).map(xml_unescape)
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parsed_from_description() {
        assert_eq!(
            source_from_description("Source: https://a.example/p | Image: https://b.example/i.jpg"),
            Some("https://a.example/p".to_string())
        );
        assert_eq!(source_from_description("A photo"), None);
    }

    #[test]
    fn xml_element_text_handles_attributes_and_entities() {
        let xml = r#"<dc:source>https://x.example/?a=1&amp;b=2</dc:source>
<dc:description><rdf:Alt><rdf:li xml:lang="x-default">a &lt;b&gt;</rdf:li></rdf:Alt></dc:description>"#;
        assert_eq!(
            xml_element_text(xml, "dc:source").as_deref(),
            Some("https://x.example/?a=1&b=2")
        );
        let alt = xml_element_raw(xml, "dc:description").unwrap();
        assert_eq!(xml_element_text(alt, "rdf:li").as_deref(), Some("a <b>"));
        assert_eq!(xml_element_text(xml, "xmp:CreateDate"), None);
    }

    #[test]
    fn unescape_amp_last() {
        assert_eq!(xml_unescape("&amp;lt;"), "&lt;");
    }

    #[test]
    fn unsupported_format_is_an_error() {
        assert!(read_embedded(b"GIF89a").is_err());
    }
}
