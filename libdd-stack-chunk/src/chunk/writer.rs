// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{ConstantPools, StackTraceChunk, CP_OFFSET_OFFSET, MAGIC, REPEAT_FLAG, SIZE_OFFSET};
use crate::constant_pool::{ConstantPool, NO_INDEX};
use crate::frame::FrameSequence;
use crate::{ChunkConfig, ChunkError, Leb128Writer};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Stack entry holding every frame of the stack.
pub const STACK_TYPE_FLAT: u8 = 0;
/// Stack entry holding the leaf-most frames followed by the index of the
/// stack entry holding the rest.
pub const STACK_TYPE_CHAINED: u8 = 1;

/// Serializes chunks into the binary chunk format.
///
/// The writer keeps no state between calls; each call allocates its own
/// bookkeeping and output buffer, so one writer can be shared by threads
/// writing different chunks.
#[derive(Clone, Debug, Default)]
pub struct ChunkWriter {
    config: ChunkConfig,
}

impl ChunkWriter {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Encodes `chunk` into a new buffer. Returns `Ok(None)` when the chunk
    /// has no stacks worth writing.
    pub fn write<C: StackTraceChunk + ?Sized>(&self, chunk: &C) -> Result<Option<Vec<u8>>, ChunkError> {
        let mut out = Leb128Writer::with_capacity(
            self.config.initial_buffer_capacity,
            self.config.max_buffer_capacity,
        );
        if !self.write_into(chunk, &mut out)? {
            return Ok(None);
        }
        Ok(Some(out.export()))
    }

    /// Appends `chunk` at the current position of `out`, so several chunks
    /// can be concatenated into one buffer. Header offsets are relative to
    /// the start of the chunk. Returns false, writing nothing, when the chunk
    /// has no stacks.
    pub fn write_into<C: StackTraceChunk + ?Sized>(
        &self,
        chunk: &C,
        out: &mut Leb128Writer,
    ) -> Result<bool, ChunkError> {
        if !chunk.has_stacks() {
            debug!(
                thread_id = chunk.thread_id(),
                samples = chunk.sample_count(),
                "Skipping stack trace chunk without stacks"
            );
            return Ok(false);
        }

        let start = out.position();
        if let Err(err) = self.encode(chunk, out, start) {
            // Chunks appended later must not follow a partial one.
            out.truncate(start);
            return Err(err);
        }
        Ok(true)
    }

    fn encode<C: StackTraceChunk + ?Sized>(
        &self,
        chunk: &C,
        out: &mut Leb128Writer,
        start: usize,
    ) -> Result<(), ChunkError> {
        // SIZE and CP_OFFSET are patched once known.
        out.write_bytes(&MAGIC)?
            .write_byte(chunk.version())?
            .write_int_raw(0)?
            .write_int_raw(0)?
            .write_long(chunk.start_time())?
            .write_long(chunk.duration())?
            .write_long(chunk.thread_id())?;

        let mut live = LiveSet::new(chunk.pools(), self.config.max_flat_depth);
        let events = chunk.compressed_stack_ptrs();
        out.write_int(to_i32(events.len())?)?;
        for event in events {
            out.write_int_raw(*event)?;
            if event & REPEAT_FLAG == 0 {
                live.mark_stack(*event)?;
            }
        }

        let cp_offset = to_i32(out.position() - start)?;
        out.write_int_raw_at(start + CP_OFFSET_OFFSET, cp_offset)?;
        live.write_pools(out)?;

        let size = to_i32(out.position() - start)?;
        out.write_int_raw_at(start + SIZE_OFFSET, size)?;

        debug!(
            thread_id = chunk.thread_id(),
            size,
            events = events.len(),
            strings = live.strings.len(),
            frames = live.frames.len(),
            stacks = live.stacks.len(),
            "Wrote stack trace chunk"
        );
        Ok(())
    }
}

fn to_i32(value: usize) -> Result<i32, ChunkError> {
    i32::try_from(value).map_err(|_| ChunkError::CapacityExceeded {
        requested: value,
        max: Leb128Writer::MAX_CAPACITY,
    })
}

/// The on-wire shape of one stack entry.
#[derive(Debug, Eq, PartialEq)]
enum StackEntry {
    Flat(Vec<i32>),
    Chained { head: Vec<i32>, tail: i32 },
}

impl StackEntry {
    fn head(&self) -> &[i32] {
        match self {
            StackEntry::Flat(frames) => frames,
            StackEntry::Chained { head, .. } => head,
        }
    }
}

/// The constants reachable from the written events. Only these are emitted,
/// so values interned but no longer referenced by any sample never reach the
/// wire.
struct LiveSet<'a> {
    pools: &'a ConstantPools,
    max_depth: usize,
    /// Tails split off stacks whose own frames exceed `max_depth` and which
    /// have no entry in the chunk's stack pool. Their indices start past the
    /// chunk's own indices.
    derived: ConstantPool<FrameSequence>,
    strings: BTreeSet<i32>,
    frames: BTreeSet<i32>,
    stacks: BTreeMap<i32, StackEntry>,
}

impl<'a> LiveSet<'a> {
    fn new(pools: &'a ConstantPools, max_depth: usize) -> Self {
        Self {
            pools,
            max_depth,
            derived: ConstantPool::with_starting_index(pools.stacks.next_index()),
            // The thread name is always written.
            strings: BTreeSet::from([0]),
            frames: BTreeSet::new(),
            stacks: BTreeMap::new(),
        }
    }

    fn resolve(&self, index: i32) -> Result<&FrameSequence, ChunkError> {
        self.pools
            .stacks
            .get(index)
            .or_else(|| self.derived.get(index))
            .ok_or(ChunkError::DanglingReference {
                pool: "stack",
                index,
            })
    }

    fn mark_stack(&mut self, stack: i32) -> Result<(), ChunkError> {
        let mut pending = vec![stack];
        while let Some(index) = pending.pop() {
            if self.stacks.contains_key(&index) {
                continue;
            }
            let entry = self.encode_stack(index)?;
            for frame in entry.head() {
                self.mark_frame(*frame)?;
            }
            if let StackEntry::Chained { tail, .. } = entry {
                pending.push(tail);
            }
            self.stacks.insert(index, entry);
        }
        Ok(())
    }

    fn mark_frame(&mut self, index: i32) -> Result<(), ChunkError> {
        if !self.frames.insert(index) {
            return Ok(());
        }
        let frame = self
            .pools
            .frames
            .get(index)
            .ok_or(ChunkError::DanglingReference {
                pool: "frame",
                index,
            })?;
        self.strings.insert(frame.owner);
        self.strings.insert(frame.method);
        Ok(())
    }

    /// Flattens the stack at `index` while it fits in `max_depth` frames.
    /// Otherwise the flattened part is cut at a sequence boundary and the
    /// entry points at the sequence holding the rest, which keeps shared
    /// tails shared on the wire.
    fn encode_stack(&mut self, index: i32) -> Result<StackEntry, ChunkError> {
        let max_depth = self.max_depth;
        let sequence = self.resolve(index)?;

        if sequence.frames().len() > max_depth {
            let head = sequence.frames()[..max_depth].to_vec();
            let rest = FrameSequence::from_parts(
                &sequence.frames()[max_depth..],
                sequence.subsequence().unwrap_or(NO_INDEX),
            )?;
            let tail = match self.pools.stacks.index_of(&rest) {
                Some(tail) => tail,
                None => self.derived.get_or_insert(rest),
            };
            return Ok(StackEntry::Chained { head, tail });
        }

        let mut head = sequence.frames().to_vec();
        let mut next = sequence.subsequence();
        while let Some(tail) = next {
            let sequence = self.resolve(tail)?;
            if head.len() + sequence.frames().len() > max_depth {
                return Ok(StackEntry::Chained { head, tail });
            }
            head.extend_from_slice(sequence.frames());
            next = sequence.subsequence();
        }
        Ok(StackEntry::Flat(head))
    }

    fn write_pools(&self, out: &mut Leb128Writer) -> Result<(), ChunkError> {
        out.write_int(to_i32(self.strings.len())?)?;
        for index in &self.strings {
            let value = match index {
                0 => self.pools.thread_name(),
                _ => self.pools.strings.get(*index).ok_or(ChunkError::DanglingReference {
                    pool: "string",
                    index: *index,
                })?,
            };
            out.write_int(*index)?.write_utf(value)?;
        }

        out.write_int(to_i32(self.frames.len())?)?;
        for index in &self.frames {
            // Marked frames were resolved while marking.
            let Some(frame) = self.pools.frames.get(*index) else {
                continue;
            };
            out.write_int(*index)?
                .write_int(frame.owner)?
                .write_int(frame.method)?
                .write_int_raw(frame.line)?;
        }

        out.write_int(to_i32(self.stacks.len())?)?;
        for (index, entry) in &self.stacks {
            out.write_int(*index)?;
            match entry {
                StackEntry::Flat(frames) => {
                    out.write_byte(STACK_TYPE_FLAT)?
                        .write_int(to_i32(frames.len())?)?;
                    for frame in frames {
                        out.write_int(*frame)?;
                    }
                }
                StackEntry::Chained { head, tail } => {
                    out.write_byte(STACK_TYPE_CHAINED)?
                        .write_int(to_i32(head.len() + 1)?)?;
                    for frame in head {
                        out.write_int(*frame)?;
                    }
                    out.write_int(*tail)?;
                }
            }
        }
        Ok(())
    }
}
