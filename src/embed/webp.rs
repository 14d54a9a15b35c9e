use anyhow::{Context, Result, bail};

use super::bytes::{ByteWriter, read_u16_le, read_u32_le, write_u32_le};
use crate::format::{WebpSubtype, webp_subtype};
use crate::record::ProvenanceRecord;

pub(crate) const CHUNK_XMP: &[u8; 4] = b"XMP ";
const CHUNK_VP8X: &[u8; 4] = b"VP8X";

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const VP8X_PAYLOAD_LEN: u32 = 10;

// VP8X flag bits
const FLAG_ANIMATION: u8 = 0x02;
const FLAG_XMP: u8 = 0x04;
const FLAG_ALPHA: u8 = 0x10;

/// Chunks of animated or separately-alpha-coded files, which are passed through untouched.
const UNSUPPORTED_CHUNKS: &[&[u8; 4]] = &[b"ALPH", b"ANIM", b"ANMF"];

const VP8_SYNC_CODE: [u8; 3] = [0x9D, 0x01, 0x2A];
const VP8L_SIGNATURE: u8 = 0x2F;

/// Escape special XML characters.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Build the XMP packet carrying the page URL, the description and the save time.
fn build_xmp(record: &ProvenanceRecord) -> String {
    let source = xml_escape(&record.page_url);
    let description = xml_escape(&record.description());
    let date = record.iso8601();

    let mut xmp = String::new();
    xmp.push_str("<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
    xmp.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    xmp.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n");
    xmp.push_str("<rdf:Description rdf:about=\"\"\n");
    xmp.push_str("  xmlns:dc=\"http://purl.org/dc/elements/1.1/\"\n");
    xmp.push_str("  xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\">\n");
    xmp.push_str(&format!("  <dc:source>{source}</dc:source>\n"));
    xmp.push_str(&format!("  <dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{description}</rdf:li></rdf:Alt></dc:description>\n"));
    xmp.push_str(&format!("  <xmp:CreateDate>{date}</xmp:CreateDate>\n"));
    xmp.push_str(&format!("  <xmp:ModifyDate>{date}</xmp:ModifyDate>\n"));
    xmp.push_str("</rdf:Description>\n");
    xmp.push_str("</rdf:RDF>\n");
    xmp.push_str("</x:xmpmeta>\n");
    xmp.push_str("<?xpacket end=\"w\"?>");
    xmp
}

/// RIFF chunk: id, LE size of the unpadded payload, payload, zero pad to even length.
fn riff_chunk(id: &[u8; 4], payload: &[u8]) -> Result<Vec<u8>> {
    let size = u32::try_from(payload.len()).context("RIFF chunk too large")?;
    let mut w = ByteWriter::with_capacity(CHUNK_HEADER_LEN + payload.len() + 1);
    w.bytes(id).u32_le(size).bytes(payload);
    if size % 2 == 1 {
        w.u8(0);
    }
    Ok(w.into_inner())
}

fn xmp_chunk(record: &ProvenanceRecord) -> Result<Vec<u8>> {
    riff_chunk(CHUNK_XMP, build_xmp(record).as_bytes())
}

/// Canvas size of a bare image chunk, plus whether the bitstream declares alpha.
#[derive(Debug, PartialEq)]
struct Canvas {
    width: u32,
    height: u32,
    alpha: bool,
}

/// Lossy keyframe header: 3-byte frame tag, sync code, 14-bit LE width and height.
fn vp8_canvas(payload: &[u8]) -> Option<Canvas> {
    let frame_tag = *payload.first()?;
    if frame_tag & 0x01 != 0 {
        // Interframe; only keyframes carry dimensions.
        return None;
    }
    if payload.get(3..6)? != VP8_SYNC_CODE {
        return None;
    }
    let width = (read_u16_le(payload, 6)? & 0x3FFF) as u32;
    let height = (read_u16_le(payload, 8)? & 0x3FFF) as u32;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Canvas {
        width,
        height,
        alpha: false,
    })
}

/// Lossless header: signature byte, then 14 bits `width - 1`, 14 bits `height - 1`,
/// 1 bit alpha hint, 3 bits version.
fn vp8l_canvas(payload: &[u8]) -> Option<Canvas> {
    if *payload.first()? != VP8L_SIGNATURE {
        return None;
    }
    let bits = read_u32_le(payload, 1)?;
    if bits >> 29 != 0 {
        // Unknown version.
        return None;
    }
    Some(Canvas {
        width: (bits & 0x3FFF) + 1,
        height: ((bits >> 14) & 0x3FFF) + 1,
        alpha: (bits >> 28) & 1 == 1,
    })
}

/// Total bytes occupied by the chunk at `offset`, header and padding included.
pub(crate) fn chunk_span(data: &[u8], offset: usize) -> Option<usize> {
    let size = read_u32_le(data, offset + 4)? as usize;
    let span = CHUNK_HEADER_LEN.checked_add(size)?.checked_add(size & 1)?;
    // A missing pad byte on the final chunk is tolerated.
    let end = offset.checked_add(CHUNK_HEADER_LEN + size)?;
    (end <= data.len()).then_some(span.min(data.len() - offset))
}

/// Copy the chunks in `data[from..]`, dropping any existing XMP chunk.
///
/// Fails on animation and ALPH chunks.
fn copy_chunks_without_xmp(data: &[u8], from: usize, out: &mut Vec<u8>) -> Result<()> {
    let mut pos = from;
    while pos < data.len() {
        if data.len() - pos < CHUNK_HEADER_LEN {
            // Trailing bytes too short to be a chunk are carried over as-is.
            out.extend_from_slice(&data[pos..]);
            break;
        }
        let span = chunk_span(data, pos)
            .with_context(|| format!("chunk at offset {pos} runs past end of data"))?;
        let id = &data[pos..pos + 4];
        if UNSUPPORTED_CHUNKS.iter().any(|c| c.as_slice() == id) {
            bail!("{} chunk is not supported", String::from_utf8_lossy(id));
        }
        if id == CHUNK_XMP {
            log::debug!("Dropping existing XMP chunk at offset {pos}");
        } else {
            out.extend_from_slice(&data[pos..pos + span]);
        }
        pos += span;
    }
    Ok(())
}

/// The 4-byte id of the first chunk, after checking the `RIFF....WEBP` header.
fn first_chunk_id(data: &[u8]) -> Result<&[u8]> {
    if data.get(0..4) != Some(b"RIFF".as_slice()) || data.get(8..12) != Some(b"WEBP".as_slice()) {
        bail!("missing RIFF/WEBP header");
    }
    data.get(RIFF_HEADER_LEN..RIFF_HEADER_LEN + 4)
        .context("no chunk after RIFF header")
}

/// Point the RIFF size field at the end of `out`.
fn patch_riff_size(mut out: Vec<u8>) -> Result<Vec<u8>> {
    let riff_size = u32::try_from(out.len() - 8).context("WebP exceeds RIFF size limit")?;
    if !write_u32_le(&mut out, 4, riff_size) {
        bail!("output shorter than RIFF header");
    }
    Ok(out)
}

/// Extended file: flag XMP in the existing VP8X header and insert the XMP chunk right after it.
pub fn inject_extended(data: &[u8], record: &ProvenanceRecord) -> Result<Vec<u8>> {
    if first_chunk_id(data)? != CHUNK_VP8X {
        bail!("expected a VP8X chunk after the RIFF header");
    }
    let vp8x_span = chunk_span(data, RIFF_HEADER_LEN).context("truncated VP8X chunk")?;
    let vp8x_end = RIFF_HEADER_LEN + vp8x_span;
    let flags_at = RIFF_HEADER_LEN + CHUNK_HEADER_LEN;
    let flags = *data
        .get(flags_at)
        .filter(|_| vp8x_span >= CHUNK_HEADER_LEN + 1)
        .context("VP8X chunk has no flags byte")?;

    if flags & FLAG_ANIMATION != 0 {
        bail!("animated WebP is not supported");
    }

    let xmp = xmp_chunk(record)?;
    let mut out = Vec::with_capacity(data.len() + xmp.len());
    out.extend_from_slice(&data[..vp8x_end]);
    out[flags_at] = flags | FLAG_XMP;
    out.extend_from_slice(&xmp);
    copy_chunks_without_xmp(data, vp8x_end, &mut out)?;
    patch_riff_size(out)
}

/// Simple file: synthesize a VP8X header from the bitstream, then XMP, then the original chunk.
pub fn inject_simple(data: &[u8], record: &ProvenanceRecord) -> Result<Vec<u8>> {
    let subtype = match first_chunk_id(data)? {
        b"VP8 " => WebpSubtype::Vp8,
        b"VP8L" => WebpSubtype::Vp8l,
        _ => bail!("expected a VP8 or VP8L chunk after the RIFF header"),
    };
    let image_start = RIFF_HEADER_LEN + CHUNK_HEADER_LEN;
    chunk_span(data, RIFF_HEADER_LEN).context("truncated image chunk")?;
    let size = read_u32_le(data, RIFF_HEADER_LEN + 4).context("truncated image chunk")? as usize;
    let payload = &data[image_start..image_start + size];

    let canvas = match subtype {
        WebpSubtype::Vp8 => vp8_canvas(payload),
        _ => vp8l_canvas(payload),
    }
    .with_context(|| format!("could not read canvas size from {subtype:?} bitstream"))?;
    log::debug!("Upgrading {subtype:?} to VP8X with canvas {canvas:?}");

    let mut flags = FLAG_XMP;
    if canvas.alpha {
        flags |= FLAG_ALPHA;
    }

    let xmp = xmp_chunk(record)?;
    let mut w = ByteWriter::with_capacity(data.len() + CHUNK_HEADER_LEN + 10 + xmp.len());
    w.bytes(&data[..RIFF_HEADER_LEN])
        .bytes(CHUNK_VP8X)
        .u32_le(VP8X_PAYLOAD_LEN)
        .u8(flags)
        .bytes(&[0, 0, 0])
        .u24_le(canvas.width - 1)
        .u24_le(canvas.height - 1)
        .bytes(&xmp);
    let mut out = w.into_inner();
    copy_chunks_without_xmp(data, RIFF_HEADER_LEN, &mut out)?;
    patch_riff_size(out)
}

/// Embed provenance as an XMP chunk, upgrading simple (VP8/VP8L) files to the extended form.
pub fn inject(data: &[u8], record: &ProvenanceRecord) -> Result<Vec<u8>> {
    match webp_subtype(data).context("not a VP8/VP8L/VP8X WebP file")? {
        WebpSubtype::Vp8x => inject_extended(data, record),
        WebpSubtype::Vp8 | WebpSubtype::Vp8l => inject_simple(data, record),
    }
}
