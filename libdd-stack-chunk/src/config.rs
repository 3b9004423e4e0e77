// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::Leb128Writer;
use serde::{Deserialize, Serialize};

/// Tuning of the chunk writer. Every field has a default, so a partial
/// configuration document is enough.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Stacks with at most this many frames are written fully flattened.
    /// Deeper stacks are written as a head of at most this many frames plus
    /// a pointer to the rest, which bounds the decoding cost of a single
    /// stack entry.
    pub max_flat_depth: usize,
    /// Bytes preallocated for an encoded chunk.
    pub initial_buffer_capacity: usize,
    /// Encoding fails once a chunk would grow past this many bytes.
    pub max_buffer_capacity: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_flat_depth: Self::DEFAULT_MAX_FLAT_DEPTH,
            initial_buffer_capacity: Leb128Writer::DEFAULT_CAPACITY,
            max_buffer_capacity: Leb128Writer::MAX_CAPACITY,
        }
    }
}

impl ChunkConfig {
    pub const DEFAULT_MAX_FLAT_DEPTH: usize = 5;

    /// Returns a copy with out of range values brought back in range: the
    /// flat depth is at least 1 and the buffer never exceeds what the raw
    /// 4-byte header offsets can address.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let max_buffer_capacity = self.max_buffer_capacity.min(Leb128Writer::MAX_CAPACITY);
        Self {
            max_flat_depth: self.max_flat_depth.max(1),
            initial_buffer_capacity: self.initial_buffer_capacity.min(max_buffer_capacity),
            max_buffer_capacity,
        }
    }
}
