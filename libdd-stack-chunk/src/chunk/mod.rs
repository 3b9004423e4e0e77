// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod collector;
mod reader;
mod writer;

pub use collector::*;
pub use reader::*;
pub use writer::*;

use crate::constant_pool::{ConstantPool, NO_INDEX};
use crate::frame::{FrameElement, FrameSequence, ResolvedFrame, StackFrame};
use crate::ChunkError;

pub const MAGIC: [u8; 4] = [b'D', b'D', 0x00, 0x09];
pub const CHUNK_VERSION: u8 = 1;

/// Offset of the raw SIZE field in the chunk header.
pub const SIZE_OFFSET: usize = 5;
/// Offset of the raw CP_OFFSET field in the chunk header.
pub const CP_OFFSET_OFFSET: usize = 9;
/// Length of the fixed-width part of the header.
pub const FIXED_HEADER_LEN: usize = 13;

/// Set on an event to mark it as a repeat marker instead of a stack pointer.
pub const REPEAT_FLAG: i32 = i32::MIN;
pub const REPEAT_MASK: i32 = i32::MAX;
/// Runs are closed once their repeat count reaches this value.
pub const MAX_REPEAT_COUNT: i32 = i32::MAX - 2;

/// The three constant pools of a chunk. Index 0 of the string pool is the
/// thread name.
#[derive(Debug)]
pub struct ConstantPools {
    pub strings: ConstantPool<String>,
    pub frames: ConstantPool<FrameElement>,
    pub stacks: ConstantPool<FrameSequence>,
}

impl ConstantPools {
    /// Empty pools, as filled by the reader.
    pub(crate) fn empty() -> Self {
        Self {
            strings: ConstantPool::new(),
            frames: ConstantPool::new(),
            stacks: ConstantPool::new(),
        }
    }

    pub fn new(thread_name: &str) -> Self {
        let mut pools = Self::empty();
        pools.strings.get_or_insert_with(thread_name);
        pools
    }

    pub fn thread_name(&self) -> &str {
        self.strings.get(0).map(String::as_str).unwrap_or_default()
    }

    /// Interns the frame's names into the string pool and the frame itself
    /// into the frame pool.
    pub fn intern_frame(&mut self, frame: &StackFrame) -> i32 {
        let owner = self.strings.get_or_insert_with(frame.class_name.as_str());
        let method = self.strings.get_or_insert_with(frame.method_name.as_str());
        self.frames
            .get_or_insert(FrameElement::new(owner, method, frame.line))
    }

    /// Interns a captured stack, ordered leaf first, as a flat sequence.
    pub fn intern_stack(&mut self, stack_trace: &[StackFrame]) -> i32 {
        let frames: Vec<i32> = stack_trace
            .iter()
            .map(|frame| self.intern_frame(frame))
            .collect();
        self.stacks.get_or_insert(FrameSequence::flat(frames))
    }

    /// Interns a stack made of `head` on top of `subsequence`, sharing the
    /// subsequence's pool entry instead of copying its frames.
    ///
    /// Fails without interning anything when the subsequence continues with
    /// a stack missing from the pool, since its length would be unknown.
    pub fn intern_chained(
        &mut self,
        head: &StackFrame,
        subsequence: Option<FrameSequence>,
    ) -> Result<i32, ChunkError> {
        let tail = match subsequence {
            Some(subsequence) => {
                let missing = ChunkError::DanglingReference {
                    pool: "stack",
                    index: subsequence.subsequence().unwrap_or(NO_INDEX),
                };
                let length = subsequence.length(&self.stacks).ok_or(missing)?;
                Some((self.stacks.get_or_insert(subsequence), length))
            }
            None => None,
        };
        let head = self.intern_frame(head);
        Ok(self.stacks.get_or_insert(FrameSequence::chained(head, tail)))
    }

    pub fn resolve_frame(&self, frame: i32) -> Option<ResolvedFrame<'_>> {
        self.frames.get(frame)?.resolve(&self.strings)
    }

    /// Resolves every frame of the stack at `stack`, leaf first.
    pub fn resolve_stack(&self, stack: i32) -> Option<Vec<ResolvedFrame<'_>>> {
        self.stacks
            .get(stack)?
            .frames_from_leaves(&self.stacks)
            .map(|frame| self.resolve_frame(frame))
            .collect()
    }
}

/// The contract shared by the in-memory collector and decoded chunks. Any
/// implementation can be serialized by [`ChunkWriter`].
pub trait StackTraceChunk {
    fn version(&self) -> u8;

    /// Chunk start, as a timestamp chosen by the caller.
    fn start_time(&self) -> i64;

    fn duration(&self) -> i64;

    fn thread_id(&self) -> i64;

    fn pools(&self) -> &ConstantPools;

    /// The run-length compressed stack pointers, in capture order.
    fn compressed_stack_ptrs(&self) -> &[i32];

    /// The number of recorded samples.
    fn sample_count(&self) -> usize;

    fn thread_name(&self) -> &str {
        self.pools().thread_name()
    }

    /// Whether the chunk holds more than one sample and is worth writing.
    fn has_stacks(&self) -> bool {
        self.sample_count() > 1
    }

    /// The stack pointer of every sample, in capture order.
    fn stack_ptrs(&self) -> DecompressedPtrs<'_> {
        decompress(self.compressed_stack_ptrs())
    }

    /// The stack of every sample, in capture order. Repeated samples yield
    /// the same reference.
    fn stacks(&self) -> impl Iterator<Item = &FrameSequence> {
        let stacks = &self.pools().stacks;
        self.stack_ptrs().filter_map(move |ptr| stacks.get(ptr))
    }

    /// The resolved frames of every sample, leaf first.
    fn resolved_stacks(&self) -> impl Iterator<Item = Vec<ResolvedFrame<'_>>> {
        let pools = self.pools();
        self.stack_ptrs()
            .map(move |ptr| pools.resolve_stack(ptr).unwrap_or_default())
    }
}

/// Appends `ptr` to a run-length compressed buffer.
///
/// A plain entry is a stack pointer. An entry with [`REPEAT_FLAG`] set
/// carries, in its low 31 bits, how many more times the plain entry before
/// it occurred.
pub fn compress_append(buffer: &mut Vec<i32>, ptr: i32) {
    compress_append_bounded(buffer, ptr, MAX_REPEAT_COUNT);
}

pub(crate) fn compress_append_bounded(buffer: &mut Vec<i32>, ptr: i32, max_repeat: i32) {
    debug_assert!(ptr >= 0, "stack pointers are pool indices");
    let Some(&last) = buffer.last() else {
        buffer.push(ptr);
        return;
    };
    if last & REPEAT_FLAG == 0 {
        if last == ptr {
            buffer.push(REPEAT_FLAG | 1);
        } else {
            buffer.push(ptr);
        }
        return;
    }

    let count = last & REPEAT_MASK;
    let base = buffer.len().checked_sub(2).map(|i| buffer[i]);
    if base == Some(ptr) && count < max_repeat {
        if let Some(last) = buffer.last_mut() {
            *last = REPEAT_FLAG | (count + 1);
        }
    } else {
        if base == Some(ptr) {
            tracing::trace!(ptr, count, "repeat count saturated, starting a new run");
        }
        buffer.push(ptr);
    }
}

/// Expands a run-length compressed buffer back into one pointer per sample.
pub fn decompress_stack_ptrs(compressed: &[i32]) -> Vec<i32> {
    decompress(compressed).collect()
}

/// Counts the samples of a run-length compressed buffer without expanding
/// it.
pub fn decompressed_len(compressed: &[i32]) -> usize {
    let mut has_base = false;
    compressed
        .iter()
        .map(|entry| {
            if entry & REPEAT_FLAG == 0 {
                has_base = true;
                1
            } else if has_base {
                (entry & REPEAT_MASK) as usize
            } else {
                0
            }
        })
        .sum()
}

pub fn decompress(compressed: &[i32]) -> DecompressedPtrs<'_> {
    DecompressedPtrs {
        compressed: compressed.iter(),
        base: None,
        pending: 0,
    }
}

/// Iterator returned by [`decompress`]. A repeat marker with no plain
/// pointer before it is skipped.
#[derive(Clone, Debug)]
pub struct DecompressedPtrs<'a> {
    compressed: std::slice::Iter<'a, i32>,
    base: Option<i32>,
    pending: u32,
}

impl Iterator for DecompressedPtrs<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending > 0 {
                self.pending -= 1;
                return self.base;
            }
            let entry = *self.compressed.next()?;
            if entry & REPEAT_FLAG == 0 {
                self.base = Some(entry);
                return Some(entry);
            }
            if self.base.is_some() {
                self.pending = (entry & REPEAT_MASK) as u32;
            }
        }
    }
}
