// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binary primitives of the chunk format: unsigned LEB128 integers (7 data
//! bits per byte, least significant group first, high bit set while more
//! bytes follow), raw big-endian fixed-width values, and length-prefixed
//! UTF-8 strings.

mod reader;
mod writer;

pub use reader::*;
pub use writer::*;

pub const EXT_BIT: u8 = 0x80;

/// A 64-bit value needs at most ten 7-bit groups.
pub const MAX_VARINT_LEN: usize = 10;

pub const COMPACT_UTF_NULL: u8 = 0;
pub const COMPACT_UTF_EMPTY: u8 = 1;
// 2 is reserved.
pub const COMPACT_UTF_UTF8: u8 = 3;
