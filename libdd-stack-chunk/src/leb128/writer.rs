// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{COMPACT_UTF_EMPTY, COMPACT_UTF_NULL, COMPACT_UTF_UTF8, EXT_BIT, MAX_VARINT_LEN};
use crate::ChunkError;
use byteorder::{BigEndian, ByteOrder};

/// A growable byte buffer which writes LEB128 encoded integers, raw
/// big-endian integers and strings.
///
/// Every primitive comes in two forms: an appending form which writes at the
/// current position and returns the writer for chaining, and an `*_at` form
/// which writes at an arbitrary offset and returns the offset just past the
/// written data. Writing at an offset inside the buffer overwrites bytes in
/// place, which is how fixed-width header fields are patched after the rest
/// of a chunk has been produced.
#[derive(Debug)]
pub struct Leb128Writer {
    buffer: Vec<u8>,
    max_capacity: usize,
}

impl Default for Leb128Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Leb128Writer {
    pub const DEFAULT_CAPACITY: usize = 4 * 1024;

    /// Offsets and sizes are stored as raw 4-byte signed ints on the wire,
    /// so nothing past this is addressable.
    pub const MAX_CAPACITY: usize = i32::MAX as usize;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY, Self::MAX_CAPACITY)
    }

    /// Creates a writer which preallocates `initial` bytes and refuses to
    /// grow past `max` bytes. `max` is clamped to [`Self::MAX_CAPACITY`].
    pub fn with_capacity(initial: usize, max: usize) -> Self {
        let max_capacity = max.min(Self::MAX_CAPACITY);
        Self {
            buffer: Vec::with_capacity(initial.min(max_capacity)),
            max_capacity,
        }
    }

    /// Returns the number of bytes needed to LEB128 encode `value`.
    #[inline]
    pub const fn varint_len(value: u64) -> usize {
        let bits = 64 - (value | 1).leading_zeros() as usize;
        bits.div_ceil(7)
    }

    /// Discards all written data and sets the position back to 0.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// The current writer position, which is also the number of bytes
    /// written so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    /// The number of bytes written adjusted by the number of bytes necessary
    /// to LEB128 encode that length itself, i.e. the size of the data if it
    /// were emitted with a length prefix.
    pub fn length(&self) -> usize {
        let len = self.position();
        let mut prefix = Self::varint_len(len as u64);
        while Self::varint_len((len + prefix) as u64) > prefix {
            prefix += 1;
        }
        len + prefix
    }

    /// The maximum number of bytes this writer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_capacity
    }

    /// Drops everything written past `len`. Has no effect if `len` is past
    /// the current position.
    pub fn truncate(&mut self, len: usize) {
        self.buffer.truncate(len);
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Transfers the written data out of the writer, leaving it empty.
    pub fn export(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Makes sure `offset..offset + len` is addressable, growing the buffer
    /// geometrically when it is not, and returns the end offset.
    fn reserve_range(&mut self, offset: usize, len: usize) -> Result<usize, ChunkError> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.max_capacity)
            .ok_or(ChunkError::CapacityExceeded {
                requested: offset.saturating_add(len),
                max: self.max_capacity,
            })?;
        if end > self.buffer.capacity() {
            let target = end
                .max(self.buffer.capacity().saturating_mul(2))
                .min(self.max_capacity);
            self.buffer.reserve_exact(target - self.buffer.len());
        }
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        Ok(end)
    }

    pub fn write_bytes_at(&mut self, offset: usize, data: &[u8]) -> Result<usize, ChunkError> {
        let end = self.reserve_range(offset, data.len())?;
        self.buffer[offset..end].copy_from_slice(data);
        Ok(end)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<&mut Self, ChunkError> {
        self.write_bytes_at(self.position(), data)?;
        Ok(self)
    }

    pub fn write_byte_at(&mut self, offset: usize, data: u8) -> Result<usize, ChunkError> {
        self.write_bytes_at(offset, &[data])
    }

    pub fn write_byte(&mut self, data: u8) -> Result<&mut Self, ChunkError> {
        self.write_byte_at(self.position(), data)?;
        Ok(self)
    }

    pub fn write_boolean_at(&mut self, offset: usize, data: bool) -> Result<usize, ChunkError> {
        self.write_byte_at(offset, data as u8)
    }

    pub fn write_boolean(&mut self, data: bool) -> Result<&mut Self, ChunkError> {
        self.write_boolean_at(self.position(), data)?;
        Ok(self)
    }

    /// Writes the 64 bits of `data` as an unsigned LEB128 value.
    pub fn write_long_at(&mut self, offset: usize, data: i64) -> Result<usize, ChunkError> {
        let mut encoded = [0u8; MAX_VARINT_LEN];
        let mut value = data as u64;
        let mut len = 0;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                encoded[len] = byte;
                len += 1;
                break;
            }
            encoded[len] = byte | EXT_BIT;
            len += 1;
        }
        self.write_bytes_at(offset, &encoded[..len])
    }

    pub fn write_long(&mut self, data: i64) -> Result<&mut Self, ChunkError> {
        self.write_long_at(self.position(), data)?;
        Ok(self)
    }

    /// Writes the 32 bits of `data` as an unsigned LEB128 value, so -1
    /// takes 5 bytes rather than 10.
    pub fn write_int_at(&mut self, offset: usize, data: i32) -> Result<usize, ChunkError> {
        self.write_long_at(offset, data as u32 as i64)
    }

    pub fn write_int(&mut self, data: i32) -> Result<&mut Self, ChunkError> {
        self.write_int_at(self.position(), data)?;
        Ok(self)
    }

    pub fn write_short_at(&mut self, offset: usize, data: i16) -> Result<usize, ChunkError> {
        self.write_long_at(offset, data as u16 as i64)
    }

    pub fn write_short(&mut self, data: i16) -> Result<&mut Self, ChunkError> {
        self.write_short_at(self.position(), data)?;
        Ok(self)
    }

    /// Writes a UTF-16 code unit as a LEB128 value.
    pub fn write_char_at(&mut self, offset: usize, data: u16) -> Result<usize, ChunkError> {
        self.write_long_at(offset, data as i64)
    }

    pub fn write_char(&mut self, data: u16) -> Result<&mut Self, ChunkError> {
        self.write_char_at(self.position(), data)?;
        Ok(self)
    }

    /// Writes the IEEE-754 bit pattern of `data`, big-endian.
    pub fn write_float_at(&mut self, offset: usize, data: f32) -> Result<usize, ChunkError> {
        let mut bytes = [0u8; 4];
        BigEndian::write_f32(&mut bytes, data);
        self.write_bytes_at(offset, &bytes)
    }

    pub fn write_float(&mut self, data: f32) -> Result<&mut Self, ChunkError> {
        self.write_float_at(self.position(), data)?;
        Ok(self)
    }

    pub fn write_double_at(&mut self, offset: usize, data: f64) -> Result<usize, ChunkError> {
        let mut bytes = [0u8; 8];
        BigEndian::write_f64(&mut bytes, data);
        self.write_bytes_at(offset, &bytes)
    }

    pub fn write_double(&mut self, data: f64) -> Result<&mut Self, ChunkError> {
        self.write_double_at(self.position(), data)?;
        Ok(self)
    }

    pub fn write_short_raw_at(&mut self, offset: usize, data: i16) -> Result<usize, ChunkError> {
        let mut bytes = [0u8; 2];
        BigEndian::write_i16(&mut bytes, data);
        self.write_bytes_at(offset, &bytes)
    }

    pub fn write_short_raw(&mut self, data: i16) -> Result<&mut Self, ChunkError> {
        self.write_short_raw_at(self.position(), data)?;
        Ok(self)
    }

    pub fn write_int_raw_at(&mut self, offset: usize, data: i32) -> Result<usize, ChunkError> {
        let mut bytes = [0u8; 4];
        BigEndian::write_i32(&mut bytes, data);
        self.write_bytes_at(offset, &bytes)
    }

    pub fn write_int_raw(&mut self, data: i32) -> Result<&mut Self, ChunkError> {
        self.write_int_raw_at(self.position(), data)?;
        Ok(self)
    }

    pub fn write_long_raw_at(&mut self, offset: usize, data: i64) -> Result<usize, ChunkError> {
        let mut bytes = [0u8; 8];
        BigEndian::write_i64(&mut bytes, data);
        self.write_bytes_at(offset, &bytes)
    }

    pub fn write_long_raw(&mut self, data: i64) -> Result<&mut Self, ChunkError> {
        self.write_long_raw_at(self.position(), data)?;
        Ok(self)
    }

    /// Writes a LEB128 byte length followed by the UTF-8 bytes of `data`.
    pub fn write_utf_at(&mut self, offset: usize, data: &str) -> Result<usize, ChunkError> {
        let len = i32::try_from(data.len()).map_err(|_| ChunkError::CapacityExceeded {
            requested: data.len(),
            max: self.max_capacity,
        })?;
        let offset = self.write_int_at(offset, len)?;
        self.write_bytes_at(offset, data.as_bytes())
    }

    pub fn write_utf(&mut self, data: &str) -> Result<&mut Self, ChunkError> {
        self.write_utf_at(self.position(), data)?;
        Ok(self)
    }

    /// Writes a tag byte distinguishing `None` (0), the empty string (1) and
    /// a non-empty string (3), the latter followed by [`Self::write_utf`]
    /// data.
    pub fn write_compact_utf_at(
        &mut self,
        offset: usize,
        data: Option<&str>,
    ) -> Result<usize, ChunkError> {
        match data {
            None => self.write_byte_at(offset, COMPACT_UTF_NULL),
            Some("") => self.write_byte_at(offset, COMPACT_UTF_EMPTY),
            Some(data) => {
                let offset = self.write_byte_at(offset, COMPACT_UTF_UTF8)?;
                self.write_utf_at(offset, data)
            }
        }
    }

    pub fn write_compact_utf(&mut self, data: Option<&str>) -> Result<&mut Self, ChunkError> {
        self.write_compact_utf_at(self.position(), data)?;
        Ok(self)
    }
}
