//! Byte-order helpers and a small cursor-tracking buffer builder.
//!
//! Readers return `None` when the requested range falls outside the slice, so callers can turn
//! a truncated container into an error with `?`-style `context` instead of panicking.

pub fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let b = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32_be(data: &[u8], offset: usize) -> Option<u32> {
    let b = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let b = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let b = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Overwrite four bytes at `offset` with `value` in little-endian order.
///
/// Returns `false` (leaving the buffer untouched) if the range is out of bounds.
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) -> bool {
    match offset.checked_add(4).and_then(|end| data.get_mut(offset..end)) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Append-only byte buffer with a write cursor.
///
/// The cursor is simply the current length; layouts that need forward references compute
/// their offsets up front and then assert them against [`ByteWriter::position`] while writing.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u16_be(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u32_be(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// 24-bit little-endian; the top byte of `value` is dropped.
    pub fn u24_le(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes()[..3]);
        self
    }

    pub fn u32_le(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
