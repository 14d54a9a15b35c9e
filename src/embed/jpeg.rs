use anyhow::{Context, Result, bail};

use super::bytes::{ByteWriter, read_u16_be};
use crate::record::ProvenanceRecord;

const MARKER_APP0: u16 = 0xFFE0;
const MARKER_APP1: u16 = 0xFFE1;
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const USER_COMMENT_ASCII: &[u8] = b"ASCII\0\0\0";

// IFD0
const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_DATE_TIME: u16 = 0x0132;
const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
// EXIF sub-IFD
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_DATE_TIME_DIGITIZED: u16 = 0x9004;
const TAG_USER_COMMENT: u16 = 0x9286;

const FORMAT_ASCII: u16 = 2;
const FORMAT_LONG: u16 = 4;
const FORMAT_UNDEFINED: u16 = 7;

const TIFF_HEADER_LEN: usize = 8;
const IFD_ENTRY_LEN: usize = 12;

/// Value slot of an IFD entry.
enum EntryValue {
    /// Fits in the 4-byte field, left-justified.
    Inline([u8; 4]),
    /// Lives in the data area; the field holds its offset.
    Data(Vec<u8>),
    /// Offset of the EXIF sub-IFD, known only once the layout is planned.
    ExifIfdOffset,
}

/// A big-endian IFD entry before offsets are resolved.
struct RawIfdEntry {
    tag_id: u16,
    data_format: u16,
    count: u32,
    value: EntryValue,
}

impl RawIfdEntry {
    fn data_len(&self) -> usize {
        match &self.value {
            EntryValue::Data(data) => data.len(),
            _ => 0,
        }
    }
}

/// Inline small payloads, spill everything else to the data area.
fn entry_value(data: Vec<u8>) -> EntryValue {
    if data.len() <= 4 {
        let mut inline = [0u8; 4];
        inline[..data.len()].copy_from_slice(&data);
        EntryValue::Inline(inline)
    } else {
        EntryValue::Data(data)
    }
}

/// ASCII (format 2) entry; the count includes the NUL terminator.
fn make_string_entry(tag_id: u16, value: &str) -> RawIfdEntry {
    let mut data = value.as_bytes().to_vec();
    data.push(0);
    RawIfdEntry {
        tag_id,
        data_format: FORMAT_ASCII,
        count: data.len() as u32,
        value: entry_value(data),
    }
}

/// UserComment (UNDEFINED, format 7): 8-byte character-code prefix, then unterminated text.
fn make_user_comment_entry(value: &str) -> RawIfdEntry {
    let mut data = USER_COMMENT_ASCII.to_vec();
    data.extend_from_slice(value.as_bytes());
    RawIfdEntry {
        tag_id: TAG_USER_COMMENT,
        data_format: FORMAT_UNDEFINED,
        count: data.len() as u32,
        value: entry_value(data),
    }
}

fn make_exif_pointer_entry() -> RawIfdEntry {
    RawIfdEntry {
        tag_id: TAG_EXIF_IFD_POINTER,
        data_format: FORMAT_LONG,
        count: 1,
        value: EntryValue::ExifIfdOffset,
    }
}

fn ifd_len(entries: &[RawIfdEntry]) -> usize {
    2 + entries.len() * IFD_ENTRY_LEN + 4
}

/// Offsets of every section, relative to the TIFF header, computed before anything is written.
#[derive(Debug, PartialEq)]
struct TiffLayout {
    ifd0_offset: usize,
    exif_ifd_offset: usize,
    data_offset: usize,
    total_len: usize,
}

impl TiffLayout {
    fn plan(ifd0: &[RawIfdEntry], exif_ifd: &[RawIfdEntry]) -> Self {
        let ifd0_offset = TIFF_HEADER_LEN;
        let exif_ifd_offset = ifd0_offset + ifd_len(ifd0);
        let data_offset = exif_ifd_offset + ifd_len(exif_ifd);
        let data_len: usize = ifd0
            .iter()
            .chain(exif_ifd)
            .map(RawIfdEntry::data_len)
            .sum();
        Self {
            ifd0_offset,
            exif_ifd_offset,
            data_offset,
            total_len: data_offset + data_len,
        }
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).context("TIFF offset exceeds 32 bits")
}

/// Write one IFD, assigning data-area offsets from `data_cursor` in entry order.
fn write_ifd(
    w: &mut ByteWriter,
    entries: &[RawIfdEntry],
    layout: &TiffLayout,
    data_cursor: &mut usize,
) -> Result<()> {
    w.u16_be(entries.len() as u16);
    for entry in entries {
        w.u16_be(entry.tag_id)
            .u16_be(entry.data_format)
            .u32_be(entry.count);
        match &entry.value {
            EntryValue::Inline(inline) => {
                w.bytes(inline);
            }
            EntryValue::Data(data) => {
                w.u32_be(to_u32(*data_cursor)?);
                *data_cursor += data.len();
            }
            EntryValue::ExifIfdOffset => {
                w.u32_be(to_u32(layout.exif_ifd_offset)?);
            }
        }
    }
    // Next-IFD pointer: none.
    w.u32_be(0);
    Ok(())
}

/// Build the big-endian TIFF structure: header, IFD0, EXIF sub-IFD, data area.
fn build_tiff(record: &ProvenanceRecord) -> Result<Vec<u8>> {
    let description = record.description();
    let datetime = record.exif_datetime();

    let ifd0 = [
        make_string_entry(TAG_IMAGE_DESCRIPTION, &description),
        make_string_entry(TAG_DATE_TIME, &datetime),
        make_exif_pointer_entry(),
    ];
    let exif_ifd = [
        make_string_entry(TAG_DATE_TIME_ORIGINAL, &datetime),
        make_string_entry(TAG_DATE_TIME_DIGITIZED, &datetime),
        make_user_comment_entry(&description),
    ];

    let layout = TiffLayout::plan(&ifd0, &exif_ifd);
    log::debug!("TIFF layout: {layout:?}");

    let mut w = ByteWriter::with_capacity(layout.total_len);
    w.bytes(b"MM").u16_be(0x002A).u32_be(to_u32(layout.ifd0_offset)?);

    let mut data_cursor = layout.data_offset;
    for (offset, entries) in [
        (layout.ifd0_offset, &ifd0[..]),
        (layout.exif_ifd_offset, &exif_ifd[..]),
    ] {
        if w.position() != offset {
            bail!("IFD written at {} but planned at {offset}", w.position());
        }
        write_ifd(&mut w, entries, &layout, &mut data_cursor)?;
    }

    if w.position() != layout.data_offset {
        bail!("data area written at {} but planned at {}", w.position(), layout.data_offset);
    }
    for entry in ifd0.iter().chain(&exif_ifd) {
        if let EntryValue::Data(data) = &entry.value {
            w.bytes(data);
        }
    }
    if w.position() != layout.total_len {
        bail!("TIFF is {} bytes but planned {}", w.position(), layout.total_len);
    }

    Ok(w.into_inner())
}

/// Build a complete APP1 segment: marker, length, `Exif\0\0`, TIFF.
fn build_app1(record: &ProvenanceRecord) -> Result<Vec<u8>> {
    let tiff = build_tiff(record)?;
    let length = 2 + EXIF_HEADER.len() + tiff.len();
    let Ok(length) = u16::try_from(length) else {
        bail!("EXIF payload of {length} bytes does not fit in one APP1 segment");
    };

    let mut w = ByteWriter::with_capacity(2 + length as usize);
    w.u16_be(MARKER_APP1).u16_be(length).bytes(EXIF_HEADER).bytes(&tiff);
    Ok(w.into_inner())
}

/// End of the marker segment starting at `offset` (marker + length field + payload).
fn segment_end(data: &[u8], offset: usize) -> Option<usize> {
    let length = read_u16_be(data, offset + 2)? as usize;
    let end = offset + 2 + length;
    (length >= 2 && end <= data.len()).then_some(end)
}

/// Markers with a length field that can precede the scan: SOFn, DHT, DQT, DRI, APPn, COM.
fn is_header_segment(marker: u16) -> bool {
    matches!(marker, 0xFFC0..=0xFFFE) && !matches!(marker, 0xFFD0..=0xFFDA)
}

/// Byte ranges of every EXIF APP1 segment between `start` and the first scan.
///
/// Other APP1 payloads (XMP) are left alone. A truncated APP1 is an error; any other segment
/// whose length cannot be trusted ends the walk.
fn exif_segments(data: &[u8], start: usize) -> Result<Vec<(usize, usize)>> {
    let mut found = Vec::new();
    let mut pos = start;
    while let Some(marker) = read_u16_be(data, pos).filter(|&m| is_header_segment(m)) {
        let Some(end) = segment_end(data, pos) else {
            if marker == MARKER_APP1 {
                bail!("truncated APP1 segment at offset {pos}");
            }
            log::debug!("Segment {marker:04X} at {pos} runs past end of data, stopping walk");
            break;
        };
        if marker == MARKER_APP1 && data[pos + 4..end].starts_with(EXIF_HEADER) {
            found.push((pos, end));
        }
        pos = end;
    }
    Ok(found)
}

/// Insert provenance as an EXIF APP1 segment directly after SOI, or after a leading APP0/JFIF
/// segment, dropping every EXIF APP1 already present before the scan.
pub fn inject(data: &[u8], record: &ProvenanceRecord) -> Result<Vec<u8>> {
    if read_u16_be(data, 0) != Some(0xFFD8) {
        bail!("missing JPEG SOI marker");
    }

    let mut insert_at = 2;
    if read_u16_be(data, insert_at) == Some(MARKER_APP0) {
        match segment_end(data, insert_at) {
            Some(end) => insert_at = end,
            None => log::debug!("APP0 length runs past end of data, inserting after SOI"),
        }
    }

    let stale = exif_segments(data, insert_at)?;
    let removed: usize = stale.iter().map(|(start, end)| end - start).sum();
    if !stale.is_empty() {
        log::debug!("Replacing {} existing EXIF APP1 ({removed} bytes)", stale.len());
    }

    let app1 = build_app1(record)?;

    let mut out = Vec::with_capacity(data.len() - removed + app1.len());
    out.extend_from_slice(&data[..insert_at]);
    out.extend_from_slice(&app1);
    let mut copied_to = insert_at;
    for (start, end) in stale {
        out.extend_from_slice(&data[copied_to..start]);
        copied_to = end;
    }
    out.extend_from_slice(&data[copied_to..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::bytes::read_u32_be;
    use chrono::DateTime;

    const STUB: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0xFF, 0xD9,
    ];

    fn record() -> ProvenanceRecord {
        ProvenanceRecord::new(
            "https://example.com/a",
            "https://cdn.example.com/a.jpg",
            DateTime::parse_from_rfc3339("2026-01-09T14:30:45+00:00").unwrap(),
        )
    }

    /// SOI + well-formed APP0 (JFIF) + EOI.
    fn jfif() -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        data.extend_from_slice(b"JFIF\0");
        data.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 0, 0]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    fn count_app1(data: &[u8]) -> usize {
        let mut pos = 2;
        let mut count = 0;
        while let Some(marker) = read_u16_be(data, pos) {
            if marker == 0xFFD9 || marker & 0xFF00 != 0xFF00 {
                break;
            }
            if marker == MARKER_APP1 {
                count += 1;
            }
            match segment_end(data, pos) {
                Some(end) => pos = end,
                None => break,
            }
        }
        count
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// (tag, format, count, value_or_offset) for every entry of the IFD at `offset`.
    fn read_ifd(tiff: &[u8], offset: usize) -> (Vec<(u16, u16, u32, u32)>, u32) {
        let count = read_u16_be(tiff, offset).unwrap() as usize;
        let entries = (0..count)
            .map(|i| {
                let e = offset + 2 + i * IFD_ENTRY_LEN;
                (
                    read_u16_be(tiff, e).unwrap(),
                    read_u16_be(tiff, e + 2).unwrap(),
                    read_u32_be(tiff, e + 4).unwrap(),
                    read_u32_be(tiff, e + 8).unwrap(),
                )
            })
            .collect();
        let next = read_u32_be(tiff, offset + 2 + count * IFD_ENTRY_LEN).unwrap();
        (entries, next)
    }

    // ── end-to-end ───────────────────────────────────────────────────

    #[test]
    fn stub_gets_single_app1_with_description_and_datetime() {
        let out = inject(STUB, &record()).unwrap();
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
        assert_eq!(&out[2..4], &[0xFF, 0xE1]);
        assert!(find(
            &out,
            b"Source: https://example.com/a | Image: https://cdn.example.com/a.jpg"
        )
        .is_some());
        assert!(find(&out, b"2026:01:09 14:30:45\0").is_some());
        assert_eq!(out.windows(2).filter(|w| *w == [0xFF, 0xE1]).count(), 1);
        // Truncated APP0 is kept after the new segment, untouched.
        assert!(out.ends_with(&STUB[2..]));
    }

    #[test]
    fn inserts_after_jfif_segment() {
        let input = jfif();
        let out = inject(&input, &record()).unwrap();
        assert_eq!(&out[..20], &input[..20]);
        assert_eq!(read_u16_be(&out, 20), Some(MARKER_APP1));
        assert!(out.ends_with(&[0xFF, 0xD9]));
        assert_eq!(count_app1(&out), 1);
    }

    #[test]
    fn inserts_after_soi_without_app0() {
        let input = vec![0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x02, 0xFF, 0xD9];
        let out = inject(&input, &record()).unwrap();
        assert_eq!(read_u16_be(&out, 2), Some(MARKER_APP1));
        assert!(out.ends_with(&input[2..]));
    }

    // ── APP1 replacement ─────────────────────────────────────────────

    #[test]
    fn replaces_existing_app1() {
        let mut input = jfif();
        let eoi = input.split_off(20);
        input.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x0A]);
        input.extend_from_slice(b"Exif\0\0MM");
        input.extend_from_slice(&eoi);

        let out = inject(&input, &record()).unwrap();
        assert_eq!(count_app1(&out), 1);
        assert!(find(&out, b"Source: https://example.com/a").is_some());

        let again = inject(&out, &record()).unwrap();
        assert_eq!(count_app1(&again), 1);
        assert_eq!(again, out);
    }

    /// SOI, APP0, APP2 (ICC), APP1 (EXIF), APP1 (XMP), EOI.
    fn with_icc_then_exif() -> Vec<u8> {
        let mut input = jfif();
        let eoi = input.split_off(20);
        input.extend_from_slice(&[0xFF, 0xE2, 0x00, 0x06]);
        input.extend_from_slice(b"ICC\0");
        input.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x0A]);
        input.extend_from_slice(b"Exif\0\0MM");
        input.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x0B]);
        input.extend_from_slice(b"http://ns");
        input.extend_from_slice(&eoi);
        input
    }

    fn count_exif_app1(data: &[u8]) -> usize {
        exif_segments(data, 2).unwrap().len()
    }

    #[test]
    fn drops_exif_app1_behind_other_segments() {
        let input = with_icc_then_exif();
        assert_eq!(count_exif_app1(&input), 1);

        let out = inject(&input, &record()).unwrap();
        assert_eq!(count_exif_app1(&out), 1);
        assert_eq!(read_u16_be(&out, 20), Some(MARKER_APP1));
        // ICC and XMP segments survive in order.
        let icc = find(&out, b"\xFF\xE2\x00\x06ICC\0").unwrap();
        let xmp = find(&out, b"\xFF\xE1\x00\x0Bhttp://ns").unwrap();
        assert!(icc < xmp);
        assert!(find(&out, b"Exif\0\0MM\xFF").is_none());
        assert_eq!(count_app1(&out), 2);

        let again = inject(&out, &record()).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn walk_stops_at_start_of_scan() {
        let mut input = jfif();
        let eoi = input.split_off(20);
        // SOS header, then entropy-coded bytes that happen to look like an EXIF APP1.
        input.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        input.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x0A]);
        input.extend_from_slice(b"Exif\0\0MM");
        input.extend_from_slice(&eoi);

        let out = inject(&input, &record()).unwrap();
        assert!(out.ends_with(&input[20..]));
    }

    #[test]
    fn truncated_app1_is_an_error() {
        let mut input = jfif();
        input.truncate(20);
        input.extend_from_slice(&[0xFF, 0xE1, 0x40, 0x00, 0x00]);
        assert!(inject(&input, &record()).is_err());
    }

    // ── TIFF structure ───────────────────────────────────────────────

    #[test]
    fn tiff_is_self_consistent() {
        let rec = record();
        let out = inject(&jfif(), &rec).unwrap();
        let app1_len = read_u16_be(&out, 22).unwrap() as usize;
        assert_eq!(&out[24..30], EXIF_HEADER);
        let tiff = &out[30..22 + app1_len];

        assert_eq!(&tiff[..4], b"MM\x00\x2A");
        assert_eq!(read_u32_be(tiff, 4), Some(8));

        let (ifd0, next0) = read_ifd(tiff, 8);
        assert_eq!(next0, 0);
        assert_eq!(
            ifd0.iter().map(|e| e.0).collect::<Vec<_>>(),
            vec![TAG_IMAGE_DESCRIPTION, TAG_DATE_TIME, TAG_EXIF_IFD_POINTER]
        );
        let exif_offset = ifd0[2].3 as usize;
        assert_eq!(ifd0[2].1, FORMAT_LONG);
        assert_eq!(exif_offset, 8 + 2 + 3 * 12 + 4);

        let (exif, next1) = read_ifd(tiff, exif_offset);
        assert_eq!(next1, 0);
        assert_eq!(
            exif.iter().map(|e| e.0).collect::<Vec<_>>(),
            vec![TAG_DATE_TIME_ORIGINAL, TAG_DATE_TIME_DIGITIZED, TAG_USER_COMMENT]
        );

        let data_start = exif_offset + 2 + 3 * 12 + 4;
        let description = rec.description();
        let mut desc_z = description.as_bytes().to_vec();
        desc_z.push(0);
        let mut comment = USER_COMMENT_ASCII.to_vec();
        comment.extend_from_slice(description.as_bytes());

        let expected: [(u16, &[u8]); 5] = [
            (FORMAT_ASCII, &desc_z),
            (FORMAT_ASCII, b"2026:01:09 14:30:45\0"),
            (FORMAT_ASCII, b"2026:01:09 14:30:45\0"),
            (FORMAT_ASCII, b"2026:01:09 14:30:45\0"),
            (FORMAT_UNDEFINED, &comment),
        ];
        let values = [ifd0[0], ifd0[1], exif[0], exif[1], exif[2]];
        let mut cursor = data_start;
        for ((format, count, offset), (want_format, want)) in values
            .iter()
            .map(|e| (e.1, e.2 as usize, e.3 as usize))
            .zip(expected)
        {
            assert_eq!(format, want_format);
            assert_eq!(offset, cursor, "data area must be contiguous and ordered");
            assert!(offset >= data_start && offset + count <= tiff.len());
            assert_eq!(&tiff[offset..offset + count], want);
            cursor += count;
        }
        assert_eq!(cursor, tiff.len());
    }

    #[test]
    fn layout_plan_matches_written_sizes() {
        let ifd0 = [make_string_entry(TAG_IMAGE_DESCRIPTION, "abcdefgh"), make_exif_pointer_entry()];
        let exif = [make_string_entry(TAG_DATE_TIME_ORIGINAL, "abc")];
        let layout = TiffLayout::plan(&ifd0, &exif);
        assert_eq!(
            layout,
            TiffLayout {
                ifd0_offset: 8,
                exif_ifd_offset: 8 + 30,
                data_offset: 8 + 30 + 18,
                total_len: 8 + 30 + 18 + 9,
            }
        );
    }

    #[test]
    fn short_strings_are_inlined() {
        let entry = make_string_entry(TAG_DATE_TIME, "abc");
        assert_eq!(entry.count, 4);
        assert!(matches!(entry.value, EntryValue::Inline(v) if v == *b"abc\0"));
    }

    // ── failures ─────────────────────────────────────────────────────

    #[test]
    fn rejects_non_jpeg() {
        assert!(inject(b"\x89PNG\r\n\x1a\n", &record()).is_err());
        assert!(inject(&[], &record()).is_err());
    }

    #[test]
    fn rejects_payload_too_large_for_app1() {
        let mut rec = record();
        rec.page_url = format!("https://example.com/{}", "a".repeat(40_000));
        assert!(inject(&jfif(), &rec).is_err());
    }

    #[test]
    fn deterministic() {
        assert_eq!(inject(STUB, &record()).unwrap(), inject(STUB, &record()).unwrap());
    }
}
