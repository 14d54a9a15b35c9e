use anyhow::{Context, Result, bail};

use super::bytes::ByteWriter;
use super::crc::crc32_parts;
use crate::format::png_ihdr_len;
use crate::record::ProvenanceRecord;

const CHUNK_TEXT: &[u8; 4] = b"tEXt";

pub(crate) const KEYWORD_SOURCE: &str = "Source";
pub(crate) const KEYWORD_CREATION_TIME: &str = "Creation Time";
pub(crate) const KEYWORD_COMMENT: &str = "Comment";

/// Signature, IHDR length field, IHDR type, and the CRC trailing the IHDR data.
const IHDR_OVERHEAD: usize = 8 + 4 + 4 + 4;

/// Frame one `tEXt` chunk: length, type, `keyword\0text`, CRC over type + data.
fn text_chunk(keyword: &str, text: &str) -> Result<Vec<u8>> {
    if text.as_bytes().contains(&0) {
        bail!("tEXt value for {keyword:?} contains a NUL byte");
    }

    let mut data = Vec::with_capacity(keyword.len() + 1 + text.len());
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    data.extend_from_slice(text.as_bytes());

    let length = u32::try_from(data.len()).context("tEXt chunk too large")?;
    let mut w = ByteWriter::with_capacity(12 + data.len());
    w.u32_be(length)
        .bytes(CHUNK_TEXT)
        .bytes(&data)
        .u32_be(crc32_parts(&[CHUNK_TEXT.as_slice(), data.as_slice()]));
    Ok(w.into_inner())
}

/// Insert `Source`, `Creation Time` and `Comment` tEXt chunks directly after IHDR.
pub fn inject(data: &[u8], record: &ProvenanceRecord) -> Result<Vec<u8>> {
    let ihdr_len = png_ihdr_len(data).context("not a PNG with a leading IHDR chunk")?;
    let ihdr_end = (ihdr_len as usize)
        .checked_add(IHDR_OVERHEAD)
        .filter(|&end| end <= data.len())
        .context("IHDR chunk runs past end of data")?;

    let chunks = [
        text_chunk(KEYWORD_SOURCE, &record.page_url)?,
        text_chunk(KEYWORD_CREATION_TIME, &record.http_date())?,
        text_chunk(KEYWORD_COMMENT, &record.comment())?,
    ];
    let added: usize = chunks.iter().map(Vec::len).sum();
    log::debug!("Inserting {added} bytes of tEXt after IHDR at {ihdr_end}");

    let mut out = Vec::with_capacity(data.len() + added);
    out.extend_from_slice(&data[..ihdr_end]);
    for chunk in &chunks {
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&data[ihdr_end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::bytes::read_u32_be;
    use crate::embed::crc::crc32;
    use chrono::DateTime;

    fn record() -> ProvenanceRecord {
        ProvenanceRecord::new(
            "https://example.com/a",
            "https://cdn.example.com/a.jpg",
            DateTime::parse_from_rfc3339("2026-01-09T14:30:45+00:00").unwrap(),
        )
    }

    fn raw_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&crc32_parts(&[kind.as_slice(), data]).to_be_bytes());
        out
    }

    /// Signature + IHDR (1x1 RGBA) + IEND.
    fn minimal_png() -> Vec<u8> {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend(raw_chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]));
        png.extend(raw_chunk(b"IEND", &[]));
        png
    }

    /// (type, data, stored crc) for every chunk after the signature.
    fn chunks(png: &[u8]) -> Vec<([u8; 4], Vec<u8>, u32)> {
        let mut pos = 8;
        let mut out = Vec::new();
        while pos + 12 <= png.len() {
            let len = read_u32_be(png, pos).unwrap() as usize;
            let kind: [u8; 4] = png[pos + 4..pos + 8].try_into().unwrap();
            let data = png[pos + 8..pos + 8 + len].to_vec();
            let crc = read_u32_be(png, pos + 8 + len).unwrap();
            out.push((kind, data, crc));
            pos += 12 + len;
        }
        out
    }

    // ── end-to-end ───────────────────────────────────────────────────

    #[test]
    fn minimal_png_gets_three_text_chunks_between_ihdr_and_iend() {
        let input = minimal_png();
        let out = inject(&input, &record()).unwrap();
        let kinds: Vec<[u8; 4]> = chunks(&out).iter().map(|c| c.0).collect();
        assert_eq!(kinds, vec![*b"IHDR", *b"tEXt", *b"tEXt", *b"tEXt", *b"IEND"]);
    }

    #[test]
    fn every_chunk_crc_validates() {
        let out = inject(&minimal_png(), &record()).unwrap();
        for (kind, data, stored) in chunks(&out) {
            let mut covered = kind.to_vec();
            covered.extend_from_slice(&data);
            assert_eq!(crc32(&covered), stored, "bad CRC on {kind:?}");
        }
    }

    #[test]
    fn keywords_in_fixed_order_with_expected_text() {
        let rec = record();
        let out = inject(&minimal_png(), &rec).unwrap();
        let texts: Vec<Vec<u8>> = chunks(&out)
            .into_iter()
            .filter(|c| &c.0 == b"tEXt")
            .map(|c| c.1)
            .collect();
        assert_eq!(texts[0], b"Source\0https://example.com/a".to_vec());
        assert_eq!(
            texts[1],
            b"Creation Time\0Fri, 09 Jan 2026 14:30:45 GMT".to_vec()
        );
        let mut comment = b"Comment\0".to_vec();
        comment.extend_from_slice(rec.comment().as_bytes());
        assert_eq!(texts[2], comment);
    }

    #[test]
    fn length_grows_by_exactly_the_new_chunks() {
        let rec = record();
        let input = minimal_png();
        let out = inject(&input, &rec).unwrap();
        let added = (12 + "Source".len() + 1 + rec.page_url.len())
            + (12 + "Creation Time".len() + 1 + rec.http_date().len())
            + (12 + "Comment".len() + 1 + rec.comment().len());
        assert_eq!(out.len(), input.len() + added);
        // Original stream preserved on both sides of the insertion.
        assert_eq!(&out[..33], &input[..33]);
        assert!(out.ends_with(&input[33..]));
    }

    #[test]
    fn later_chunks_preserved_byte_for_byte() {
        let mut input = minimal_png();
        let iend = input.split_off(33);
        input.extend(raw_chunk(b"IDAT", &[1, 2, 3, 4, 5]));
        input.extend(iend);
        let out = inject(&input, &record()).unwrap();
        assert!(out.ends_with(&input[33..]));
        let kinds: Vec<[u8; 4]> = chunks(&out).iter().map(|c| c.0).collect();
        assert_eq!(&kinds[4..], &[*b"IDAT", *b"IEND"]);
    }

    // ── failures ─────────────────────────────────────────────────────

    #[test]
    fn rejects_truncated_ihdr() {
        let mut input = minimal_png();
        input.truncate(30);
        assert!(inject(&input, &record()).is_err());
    }

    #[test]
    fn rejects_missing_ihdr() {
        let mut input = b"\x89PNG\r\n\x1a\n".to_vec();
        input.extend(raw_chunk(b"IEND", &[]));
        assert!(inject(&input, &record()).is_err());
    }

    #[test]
    fn rejects_nul_in_text() {
        let mut rec = record();
        rec.page_url = "https://example.com/\0".into();
        assert!(inject(&minimal_png(), &rec).is_err());
    }
}
