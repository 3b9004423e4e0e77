// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{
    decompressed_len, ConstantPools, StackTraceChunk, FIXED_HEADER_LEN, MAGIC, REPEAT_FLAG,
    STACK_TYPE_CHAINED, STACK_TYPE_FLAT,
};
use crate::constant_pool::NO_INDEX;
use crate::frame::{FrameElement, FrameSequence};
use crate::{ChunkError, Leb128Reader};
use tracing::debug;

/// A chunk decoded from its binary form. It exposes the same contract as
/// the collector it was written from, so it can be inspected or written
/// again.
#[derive(Debug)]
pub struct ChunkData {
    version: u8,
    start_time: i64,
    duration: i64,
    thread_id: i64,
    pools: ConstantPools,
    stack_ptrs: Vec<i32>,
    sample_count: usize,
}

impl StackTraceChunk for ChunkData {
    fn version(&self) -> u8 {
        self.version
    }

    fn start_time(&self) -> i64 {
        self.start_time
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn thread_id(&self) -> i64 {
        self.thread_id
    }

    fn pools(&self) -> &ConstantPools {
        &self.pools
    }

    fn compressed_stack_ptrs(&self) -> &[i32] {
        &self.stack_ptrs
    }

    fn sample_count(&self) -> usize {
        self.sample_count
    }
}

/// Decodes the chunks of a buffer, one after the other.
///
/// Iteration stops after the first error: the declared size of a broken
/// chunk cannot be trusted to find the next one.
#[derive(Clone, Debug)]
pub struct ChunkReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ChunkReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Decodes every chunk of `data`.
    pub fn read_all(data: &'a [u8]) -> Result<Vec<ChunkData>, ChunkError> {
        Self::new(data).collect()
    }

    /// The offset of the next chunk.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Decodes the chunk at the current position and moves past it.
    pub fn read_chunk(&mut self) -> Result<ChunkData, ChunkError> {
        let start = self.position;
        let available = self.data.len().saturating_sub(start);
        let mut header = Leb128Reader::new(&self.data[start.min(self.data.len())..]);

        let magic = header.read_bytes(MAGIC.len())?;
        if magic != MAGIC {
            let mut found = [0; 4];
            found.copy_from_slice(magic);
            return Err(ChunkError::InvalidMagic(found));
        }
        let version = header.read_byte()?;
        let size = header.read_int_raw()?;
        let cp_offset = header.read_int_raw()?;
        let invalid_layout = ChunkError::InvalidChunkLayout {
            size,
            cp_offset,
            available,
        };
        let (Ok(chunk_len), Ok(pools_start)) = (usize::try_from(size), usize::try_from(cp_offset))
        else {
            return Err(invalid_layout);
        };
        if pools_start < FIXED_HEADER_LEN || pools_start > chunk_len || chunk_len > available {
            return Err(invalid_layout);
        }

        // Offsets are relative to the chunk start, so the chunk is read on
        // its own.
        let mut reader = Leb128Reader::new(&self.data[start..start + chunk_len]);
        reader.set_position(FIXED_HEADER_LEN);
        let start_time = reader.read_long()?;
        let duration = reader.read_long()?;
        let thread_id = reader.read_long()?;
        let events_start = reader.position();

        reader.set_position(pools_start);
        let pools = read_pools(&mut reader)?;

        reader.set_position(events_start);
        let stack_ptrs = read_events(&mut reader, &pools)?;
        if reader.position() > pools_start {
            return Err(invalid_layout);
        }

        self.position = start + chunk_len;
        let chunk = ChunkData {
            version,
            start_time,
            duration,
            thread_id,
            sample_count: decompressed_len(&stack_ptrs),
            pools,
            stack_ptrs,
        };
        debug!(
            thread_id,
            size,
            samples = chunk.sample_count,
            stacks = chunk.pools.stacks.size(),
            "Read stack trace chunk"
        );
        Ok(chunk)
    }
}

impl Iterator for ChunkReader<'_> {
    type Item = Result<ChunkData, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.data.len() {
            return None;
        }
        let chunk = self.read_chunk();
        if chunk.is_err() {
            self.position = self.data.len();
        }
        Some(chunk)
    }
}

fn read_count(reader: &mut Leb128Reader<'_>) -> Result<usize, ChunkError> {
    let count = reader.read_int()?;
    usize::try_from(count).map_err(|_| ChunkError::InvalidCount(count))
}

fn read_events(reader: &mut Leb128Reader<'_>, pools: &ConstantPools) -> Result<Vec<i32>, ChunkError> {
    let count = read_count(reader)?;
    let mut stack_ptrs = Vec::with_capacity(count.min(reader.remaining() / 4));
    let mut has_base = false;
    for position in 0..count {
        let event = reader.read_int_raw()?;
        if event & REPEAT_FLAG != 0 {
            if !has_base {
                return Err(ChunkError::OrphanRepeatMarker(position));
            }
        } else if pools.stacks.get(event).is_none() {
            return Err(ChunkError::DanglingReference {
                pool: "stack",
                index: event,
            });
        } else {
            has_base = true;
        }
        stack_ptrs.push(event);
    }
    Ok(stack_ptrs)
}

/// Reads the string, frame and stack pools, in that order, so that every
/// reference can be checked against the pools already read. Stacks may
/// refer to stacks written after them, so their chains are checked last.
fn read_pools(reader: &mut Leb128Reader<'_>) -> Result<ConstantPools, ChunkError> {
    let mut pools = ConstantPools::empty();

    for _ in 0..read_count(reader)? {
        let index = reader.read_int()?;
        let value = reader.read_utf()?;
        pools.strings.insert(index, value)?;
    }

    for _ in 0..read_count(reader)? {
        let index = reader.read_int()?;
        let frame = FrameElement::new(
            reader.read_int()?,
            reader.read_int()?,
            reader.read_int_raw()?,
        );
        for string in [frame.owner, frame.method] {
            if pools.strings.get(string).is_none() {
                return Err(ChunkError::DanglingReference {
                    pool: "string",
                    index: string,
                });
            }
        }
        pools.frames.insert(index, frame)?;
    }

    for _ in 0..read_count(reader)? {
        let index = reader.read_int()?;
        let kind = reader.read_byte()?;
        let raw_count = reader.read_int()?;
        let count = usize::try_from(raw_count).map_err(|_| ChunkError::InvalidCount(raw_count))?;
        let frame_count = match kind {
            STACK_TYPE_FLAT => count,
            STACK_TYPE_CHAINED if count > 0 => count - 1,
            STACK_TYPE_CHAINED => return Err(ChunkError::InvalidCount(raw_count)),
            _ => return Err(ChunkError::InvalidStackType(kind)),
        };

        let mut frames = Vec::with_capacity(frame_count.min(reader.remaining()));
        for _ in 0..frame_count {
            let frame = reader.read_int()?;
            if pools.frames.get(frame).is_none() {
                return Err(ChunkError::DanglingReference {
                    pool: "frame",
                    index: frame,
                });
            }
            frames.push(frame);
        }
        let subsequence = match kind {
            STACK_TYPE_CHAINED => reader.read_int()?,
            _ => NO_INDEX,
        };
        pools
            .stacks
            .insert(index, FrameSequence::from_parts(frames, subsequence)?)?;
    }

    for (index, sequence) in pools.stacks.iter() {
        if sequence.length(&pools.stacks).is_none() {
            return Err(ChunkError::DanglingReference {
                pool: "stack",
                index: sequence.subsequence().unwrap_or(index),
            });
        }
    }
    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkCollector, ChunkWriter, CHUNK_VERSION};
    use crate::{Leb128Writer, StackFrame};

    fn sample(name: &str, depth: usize) -> Vec<StackFrame> {
        (0..depth)
            .map(|i| StackFrame::new(format!("com.example.{name}{i}"), "run", i as i32))
            .collect()
    }

    fn collector(thread_id: i64) -> ChunkCollector {
        let mut collector = ChunkCollector::new(thread_id, &format!("thread-{thread_id}"), 10);
        collector.collect(&sample("A", 3));
        collector.collect(&sample("A", 3));
        collector.collect(&sample("B", 8));
        collector.close(20);
        collector
    }

    /// A chunk with strings `main`, `C` and `m`, one frame at index 0 and
    /// the given events and stack entries.
    fn raw_chunk(events: &[i32], stacks: &[(i32, u8, &[i32])]) -> Vec<u8> {
        let mut out = Leb128Writer::new();
        out.write_bytes(&MAGIC)
            .unwrap()
            .write_byte(CHUNK_VERSION)
            .unwrap()
            .write_int_raw(0)
            .unwrap()
            .write_int_raw(0)
            .unwrap()
            .write_long(0)
            .unwrap()
            .write_long(0)
            .unwrap()
            .write_long(1)
            .unwrap()
            .write_int(events.len() as i32)
            .unwrap();
        for event in events {
            out.write_int_raw(*event).unwrap();
        }
        let cp_offset = out.position() as i32;
        out.write_int_raw_at(9, cp_offset).unwrap();
        out.write_int(3).unwrap();
        for (index, value) in ["main", "C", "m"].iter().enumerate() {
            out.write_int(index as i32).unwrap().write_utf(value).unwrap();
        }
        out.write_int(1)
            .unwrap()
            .write_int(0)
            .unwrap()
            .write_int(1)
            .unwrap()
            .write_int(2)
            .unwrap()
            .write_int_raw(7)
            .unwrap();
        out.write_int(stacks.len() as i32).unwrap();
        for (index, kind, values) in stacks {
            out.write_int(*index)
                .unwrap()
                .write_byte(*kind)
                .unwrap()
                .write_int(values.len() as i32)
                .unwrap();
            for value in *values {
                out.write_int(*value).unwrap();
            }
        }
        let size = out.position() as i32;
        out.write_int_raw_at(5, size).unwrap();
        out.export()
    }

    #[test]
    fn test_read_written_chunk() {
        let collector = collector(4);
        let bytes = ChunkWriter::default().write(&collector).unwrap().unwrap();
        let mut reader = ChunkReader::new(&bytes);
        let chunk = reader.next().unwrap().unwrap();
        assert!(reader.next().is_none());

        assert_eq!(CHUNK_VERSION, chunk.version());
        assert_eq!(10, chunk.start_time());
        assert_eq!(10, chunk.duration());
        assert_eq!(4, chunk.thread_id());
        assert_eq!("thread-4", chunk.thread_name());
        assert_eq!(3, chunk.sample_count());
        assert_eq!(
            collector.compressed_stack_ptrs(),
            chunk.compressed_stack_ptrs()
        );
        let expected: Vec<_> = collector.resolved_stacks().collect();
        let actual: Vec<_> = chunk.resolved_stacks().collect();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_concatenated_chunks() {
        let writer = ChunkWriter::default();
        let mut out = Leb128Writer::new();
        for thread_id in 1..=3 {
            assert!(writer.write_into(&collector(thread_id), &mut out).unwrap());
        }
        let bytes = out.export();

        let chunks = ChunkReader::read_all(&bytes).unwrap();
        assert_eq!(
            vec![1, 2, 3],
            chunks.iter().map(|c| c.thread_id()).collect::<Vec<_>>()
        );
        assert!(chunks.iter().all(|c| c.sample_count() == 3));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = raw_chunk(&[0, REPEAT_FLAG | 1], &[(0, STACK_TYPE_FLAT, &[0])]);
        bytes[1] = b'X';
        assert!(matches!(
            ChunkReader::read_all(&bytes),
            Err(ChunkError::InvalidMagic([b'D', b'X', 0, 9]))
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = raw_chunk(&[0, REPEAT_FLAG | 1], &[(0, STACK_TYPE_FLAT, &[0])]);
        assert!(ChunkReader::read_all(&bytes).is_ok());
        assert!(matches!(
            ChunkReader::read_all(&bytes[..bytes.len() - 1]),
            Err(ChunkError::InvalidChunkLayout { .. })
        ));
        assert!(matches!(
            ChunkReader::read_all(&bytes[..7]),
            Err(ChunkError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_error_ends_iteration() {
        let mut bytes = raw_chunk(&[0, REPEAT_FLAG | 1], &[(0, STACK_TYPE_FLAT, &[0])]);
        bytes.extend_from_slice(b"garbage");
        let mut reader = ChunkReader::new(&bytes);
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_orphan_repeat_marker() {
        let bytes = raw_chunk(&[REPEAT_FLAG | 1, 0], &[(0, STACK_TYPE_FLAT, &[0])]);
        assert!(matches!(
            ChunkReader::read_all(&bytes),
            Err(ChunkError::OrphanRepeatMarker(0))
        ));
    }

    #[test]
    fn test_dangling_references() {
        let bytes = raw_chunk(&[1, 0], &[(0, STACK_TYPE_FLAT, &[0])]);
        assert!(matches!(
            ChunkReader::read_all(&bytes),
            Err(ChunkError::DanglingReference {
                pool: "stack",
                index: 1
            })
        ));

        let bytes = raw_chunk(&[0, 0], &[(0, STACK_TYPE_FLAT, &[3])]);
        assert!(matches!(
            ChunkReader::read_all(&bytes),
            Err(ChunkError::DanglingReference {
                pool: "frame",
                index: 3
            })
        ));

        let bytes = raw_chunk(&[0, 0], &[(0, STACK_TYPE_CHAINED, &[0, 5])]);
        assert!(matches!(
            ChunkReader::read_all(&bytes),
            Err(ChunkError::DanglingReference {
                pool: "stack",
                index: 5
            })
        ));
    }

    #[test]
    fn test_forward_subsequence_reference() {
        let bytes = raw_chunk(
            &[0, REPEAT_FLAG | 1],
            &[(0, STACK_TYPE_CHAINED, &[0, 0, 1]), (1, STACK_TYPE_FLAT, &[0])],
        );
        let chunk = ChunkReader::read_all(&bytes).unwrap().remove(0);
        assert_eq!(2, chunk.sample_count());
        let stack = chunk.pools().resolve_stack(0).unwrap();
        assert_eq!(3, stack.len());
        assert!(stack.iter().all(|f| *f == StackFrame::new("C", "m", 7)));
    }

    #[test]
    fn test_unknown_stack_type() {
        let bytes = raw_chunk(&[0, 0], &[(0, 2, &[0])]);
        assert!(matches!(
            ChunkReader::read_all(&bytes),
            Err(ChunkError::InvalidStackType(2))
        ));
    }

    #[test]
    fn fuzz_reader_never_panics() {
        let seed = raw_chunk(&[0, REPEAT_FLAG | 1], &[(0, STACK_TYPE_FLAT, &[0])]);
        bolero::check!()
            .with_type::<(u8, u8, Vec<u8>)>()
            .for_each(|(at, value, tail)| {
                let mut bytes = seed.clone();
                let at = *at as usize % bytes.len();
                bytes[at] = *value;
                bytes.extend_from_slice(tail);
                let _ = ChunkReader::read_all(&bytes);
            });
    }
}
