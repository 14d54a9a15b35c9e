use std::sync::OnceLock;

const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Reflected CRC-32 lookup table, built on first use and shared read-only afterwards.
fn table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut crc = i as u32;
            for _ in 0..8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ POLYNOMIAL;
                } else {
                    crc >>= 1;
                }
            }
            *slot = crc;
        }
        table
    })
}

/// Standard CRC-32 (as used by PNG, zlib, gzip) over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_parts(&[data])
}

/// CRC-32 over the concatenation of `parts`, without concatenating them.
///
/// PNG chunk CRCs cover the chunk type followed by the chunk data.
pub fn crc32_parts(parts: &[&[u8]]) -> u32 {
    let table = table();
    let mut crc = 0xFFFF_FFFFu32;
    for part in parts {
        for &byte in *part {
            let index = ((crc ^ byte as u32) & 0xFF) as usize;
            crc = (crc >> 8) ^ table[index];
        }
    }
    crc ^ 0xFFFF_FFFF
}
