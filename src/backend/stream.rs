//! A growable byte sink with the LEB128 forms the binary format uses.

use wasm_encoder::Encode;

/// Width of a u32 LEB128 padded to its maximum length.
pub const MAX_U32_LEB128_BYTES: usize = 5;

/// Minimal number of bytes needed to LEB128-encode `value`.
pub fn u32_leb128_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// `value` as a LEB128 padded to five bytes with continuation bits.
pub fn fixed_u32_leb128(value: u32) -> [u8; MAX_U32_LEB128_BYTES] {
    [
        (value & 0x7f) as u8 | 0x80,
        ((value >> 7) & 0x7f) as u8 | 0x80,
        ((value >> 14) & 0x7f) as u8 | 0x80,
        ((value >> 21) & 0x7f) as u8 | 0x80,
        ((value >> 28) & 0x0f) as u8,
    ]
}

#[derive(Clone, Debug, Default)]
pub struct Stream {
    data: Vec<u8>,
}

impl Stream {
    pub fn new() -> Self {
        Stream::default()
    }

    pub fn offset(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.data.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Little-endian, fixed width.
    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32_leb128(&mut self, value: u32) {
        value.encode(&mut self.data);
    }

    pub fn write_u64_leb128(&mut self, value: u64) {
        value.encode(&mut self.data);
    }

    pub fn write_s32_leb128(&mut self, value: i32) {
        value.encode(&mut self.data);
    }

    pub fn write_s64_leb128(&mut self, value: i64) {
        value.encode(&mut self.data);
    }

    pub fn write_fixed_u32_leb128(&mut self, value: u32) {
        self.data.extend_from_slice(&fixed_u32_leb128(value));
    }

    /// Length-prefixed UTF-8.
    pub fn write_str(&mut self, s: &str) {
        s.encode(&mut self.data);
    }

    /// Reserves `guess` bytes for a size that is only known once the
    /// payload after it has been written. Returns the slot's offset.
    pub fn write_u32_leb128_space(&mut self, guess: usize) -> usize {
        let offset = self.offset();
        self.data.resize(offset + guess, 0);
        offset
    }

    /// Fills a slot reserved by `write_u32_leb128_space` with the size
    /// of everything written after it.
    ///
    /// With `canonical`, the size is encoded minimally and the payload
    /// moves to sit right after it; the return value is how far it
    /// moved (positive when the guess was too short). Otherwise the
    /// slot must be `MAX_U32_LEB128_BYTES` wide and is patched in
    /// place, and the return value is 0.
    pub fn fixup_u32_leb128_size(&mut self, offset: usize, guess: usize, canonical: bool) -> isize {
        let size = (self.offset() - offset - guess) as u32;
        if canonical {
            let mut leb = Vec::with_capacity(MAX_U32_LEB128_BYTES);
            size.encode(&mut leb);
            let delta = leb.len() as isize - guess as isize;
            self.data.splice(offset..offset + guess, leb);
            delta
        } else {
            debug_assert_eq!(guess, MAX_U32_LEB128_BYTES);
            self.data[offset..offset + MAX_U32_LEB128_BYTES]
                .copy_from_slice(&fixed_u32_leb128(size));
            0
        }
    }
}
