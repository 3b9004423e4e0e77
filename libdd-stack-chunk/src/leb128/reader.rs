// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{COMPACT_UTF_EMPTY, COMPACT_UTF_NULL, COMPACT_UTF_UTF8, EXT_BIT, MAX_VARINT_LEN};
use crate::ChunkError;
use byteorder::{BigEndian, ByteOrder};

/// Reads the encodings produced by [`super::Leb128Writer`] from a borrowed
/// buffer. The position can be moved freely, which the chunk reader uses to
/// jump to the constant pools and back to the events.
#[derive(Clone, Debug)]
pub struct Leb128Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Leb128Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the reader. Positions past the end are allowed; the next read
    /// from there fails.
    #[inline]
    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], ChunkError> {
        let available = self.remaining();
        if needed > available {
            return Err(ChunkError::UnexpectedEof {
                offset: self.position,
                needed,
                available,
            });
        }
        let start = self.position;
        self.position += needed;
        Ok(&self.data[start..self.position])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ChunkError> {
        self.take(len)
    }

    pub fn read_byte(&mut self) -> Result<u8, ChunkError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_boolean(&mut self) -> Result<bool, ChunkError> {
        Ok(self.read_byte()? != 0)
    }

    /// Reads an unsigned LEB128 value of at most 64 bits.
    pub fn read_long(&mut self) -> Result<i64, ChunkError> {
        let start = self.position;
        let mut result = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_byte()?;
            result |= ((byte & !EXT_BIT) as u64) << (7 * i);
            if byte & EXT_BIT == 0 {
                return Ok(result as i64);
            }
        }
        Err(ChunkError::VarintOverflow(start))
    }

    pub fn read_int(&mut self) -> Result<i32, ChunkError> {
        Ok(self.read_long()? as i32)
    }

    pub fn read_short(&mut self) -> Result<i16, ChunkError> {
        Ok(self.read_long()? as i16)
    }

    pub fn read_char(&mut self) -> Result<u16, ChunkError> {
        Ok(self.read_long()? as u16)
    }

    pub fn read_float(&mut self) -> Result<f32, ChunkError> {
        Ok(BigEndian::read_f32(self.take(4)?))
    }

    pub fn read_double(&mut self) -> Result<f64, ChunkError> {
        Ok(BigEndian::read_f64(self.take(8)?))
    }

    pub fn read_short_raw(&mut self) -> Result<i16, ChunkError> {
        Ok(BigEndian::read_i16(self.take(2)?))
    }

    pub fn read_int_raw(&mut self) -> Result<i32, ChunkError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn read_long_raw(&mut self) -> Result<i64, ChunkError> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    pub fn read_utf(&mut self) -> Result<String, ChunkError> {
        let len = self.read_int()? as u32 as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn read_compact_utf(&mut self) -> Result<Option<String>, ChunkError> {
        match self.read_byte()? {
            COMPACT_UTF_NULL => Ok(None),
            COMPACT_UTF_EMPTY => Ok(Some(String::new())),
            COMPACT_UTF_UTF8 => self.read_utf().map(Some),
            tag => Err(ChunkError::InvalidStringTag(tag)),
        }
    }
}
