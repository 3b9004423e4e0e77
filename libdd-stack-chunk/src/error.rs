// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::string::FromUtf8Error;

/// Represents errors that occur while building, encoding or decoding stack
/// trace chunks.
///
/// Decoding assumes a well-formed buffer, so every decoding error is final:
/// there is no partial result and no recovery within the failed chunk.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// The buffer does not start with the chunk magic bytes.
    #[error("invalid chunk magic {0:02x?}")]
    InvalidMagic([u8; 4]),
    /// The buffer ended before a value could be fully read.
    #[error("unexpected end of buffer at offset {offset}: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// A LEB128 value continued past 64 bits.
    #[error("LEB128 value at offset {0} does not fit in 64 bits")]
    VarintOverflow(usize),
    /// A compact string used a tag other than 0 (null), 1 (empty) or 3 (UTF-8).
    #[error("invalid compact string tag {0}")]
    InvalidStringTag(u8),
    #[error("invalid utf-8 string payload: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    /// A stack pool entry used an unknown on-wire shape.
    #[error("invalid stack entry type {0}")]
    InvalidStackType(u8),
    /// The declared chunk size or constant pool offset points outside the
    /// buffer or into the header.
    #[error("invalid chunk layout: size {size}, constant pool offset {cp_offset}, {available} bytes available")]
    InvalidChunkLayout {
        size: i32,
        cp_offset: i32,
        available: usize,
    },
    /// A pointer referred to a constant pool slot which holds no value.
    #[error("dangling {pool} pool reference {index}")]
    DanglingReference { pool: &'static str, index: i32 },
    /// A repeat marker appeared before any plain stack pointer.
    #[error("repeat marker at event {0} has no preceding stack pointer")]
    OrphanRepeatMarker(usize),
    /// An explicit constant pool index was negative.
    #[error("negative constant pool index {0}")]
    NegativeIndex(i32),
    /// A pool or event count was out of range.
    #[error("invalid element count {0}")]
    InvalidCount(i32),
    /// A frame sequence without frames cannot have a subsequence.
    #[error("frame sequence without frames cannot continue with subsequence {0}")]
    InvalidSequence(i32),
    /// The encoded buffer would exceed the maximum addressable size.
    #[error("buffer capacity exceeded: {requested} bytes requested, maximum is {max}")]
    CapacityExceeded { requested: usize, max: usize },
}
