// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{compress_append, ConstantPools, StackTraceChunk, CHUNK_VERSION};
use crate::frame::StackFrame;
use std::cell::Cell;
use std::marker::PhantomData;

/// Records the stacks captured for one thread during one profiling window.
///
/// The collector is the only writer of its chunk and is not synchronized:
/// it is `!Sync`, so the compiler restricts capturing to a single thread at
/// a time. It can still be moved, e.g. to hand a finished window over to the
/// thread serializing it.
#[derive(Debug)]
pub struct ChunkCollector {
    start_time: i64,
    duration: i64,
    thread_id: i64,
    pools: ConstantPools,
    stack_ptrs: Vec<i32>,
    sample_count: usize,
    base_stack: Option<Vec<StackFrame>>,
    _single_writer: PhantomData<Cell<()>>,
}

impl ChunkCollector {
    pub fn new(thread_id: i64, thread_name: &str, start_time: i64) -> Self {
        Self {
            start_time,
            duration: 0,
            thread_id,
            pools: ConstantPools::new(thread_name),
            stack_ptrs: Vec::new(),
            sample_count: 0,
            base_stack: None,
            _single_writer: PhantomData,
        }
    }

    /// Sets a stack, ordered leaf first, which is recorded as an implicit
    /// first sample on the first call to [`Self::collect`]. Capturing it is
    /// cheap for the caller; interning it is deferred to the first sample.
    #[must_use]
    pub fn with_base_stack(mut self, base_stack: Vec<StackFrame>) -> Self {
        self.base_stack = Some(base_stack);
        self
    }

    /// Records one sample. `stack_trace` is ordered leaf first. An empty
    /// stack trace records nothing.
    pub fn collect(&mut self, stack_trace: &[StackFrame]) {
        self.consume_base_stack();
        if stack_trace.is_empty() {
            return;
        }
        let ptr = self.pools.intern_stack(stack_trace);
        self.append(ptr);
    }

    /// Records one sample whose stack was already interned through
    /// [`Self::pools_mut`], e.g. with [`ConstantPools::intern_chained`].
    /// Returns false, recording nothing, if `stack` is not in the stack pool.
    pub fn collect_interned(&mut self, stack: i32) -> bool {
        self.consume_base_stack();
        if self.pools.stacks.get(stack).is_none() {
            return false;
        }
        self.append(stack);
        true
    }

    fn consume_base_stack(&mut self) {
        if let Some(base_stack) = self.base_stack.take() {
            self.collect(&base_stack);
        }
    }

    fn append(&mut self, ptr: i32) {
        compress_append(&mut self.stack_ptrs, ptr);
        self.sample_count += 1;
    }

    /// Ends the window at `end_time`, which uses the same clock as the start
    /// time.
    pub fn close(&mut self, end_time: i64) {
        self.duration = end_time.saturating_sub(self.start_time).max(0);
    }

    pub fn pools_mut(&mut self) -> &mut ConstantPools {
        &mut self.pools
    }
}

impl StackTraceChunk for ChunkCollector {
    fn version(&self) -> u8 {
        CHUNK_VERSION
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::REPEAT_FLAG;
    use crate::FrameSequence;

    fn frames(names: &[&str]) -> Vec<StackFrame> {
        names
            .iter()
            .enumerate()
            .map(|(line, name)| {
                StackFrame::new(format!("com.example.{name}"), *name, line as i32)
            })
            .collect()
    }

    #[test]
    fn test_repeated_samples_are_compressed() {
        let abc = frames(&["a", "b", "c"]);
        let xbc = frames(&["x", "b", "c"]);
        let mut collector = ChunkCollector::new(1, "worker", 0);
        collector.collect(&abc);
        collector.collect(&abc);
        collector.collect(&abc);
        collector.collect(&xbc);

        let abc_ptr = collector
            .pools()
            .stacks
            .index_of(&FrameSequence::flat(vec![0, 1, 2]));
        assert_eq!(Some(0), abc_ptr);
        assert_eq!(&[0, REPEAT_FLAG | 2, 1], collector.compressed_stack_ptrs());
        assert_eq!(4, collector.sample_count());

        let stacks: Vec<_> = collector.stacks().collect();
        assert_eq!(4, stacks.len());
        assert!(std::ptr::eq(stacks[0], stacks[2]));
        assert!(!std::ptr::eq(stacks[2], stacks[3]));
        let resolved: Vec<_> = collector.resolved_stacks().collect();
        assert_eq!(resolved[0], abc);
        assert_eq!(resolved[3], xbc);
    }

    #[test]
    fn test_empty_sample_is_ignored() {
        let mut collector = ChunkCollector::new(1, "worker", 0);
        collector.collect(&[]);
        assert_eq!(0, collector.sample_count());
        assert!(collector.compressed_stack_ptrs().is_empty());
    }

    #[test]
    fn test_has_stacks() {
        let mut collector = ChunkCollector::new(1, "worker", 0);
        assert!(!collector.has_stacks());
        collector.collect(&frames(&["a"]));
        assert!(!collector.has_stacks());
        collector.collect(&frames(&["a"]));
        assert!(collector.has_stacks());
    }

    #[test]
    fn test_base_stack_is_consumed_once() {
        let base = frames(&["base", "root"]);
        let mut collector = ChunkCollector::new(7, "worker", 0).with_base_stack(base.clone());
        assert_eq!(0, collector.sample_count());

        let sample = frames(&["leaf", "root"]);
        collector.collect(&sample);
        collector.collect(&sample);
        assert_eq!(3, collector.sample_count());

        let resolved: Vec<_> = collector.resolved_stacks().collect();
        assert_eq!(resolved[0], base);
        assert_eq!(resolved[1], sample);
        assert_eq!(resolved[2], sample);
    }

    #[test]
    fn test_collect_interned() {
        let mut collector = ChunkCollector::new(1, "worker", 0);
        let tail = collector.pools_mut().intern_stack(&frames(&["b", "c"]));
        let head = StackFrame::new("com.example.a", "a", 9);
        let tail_sequence = collector.pools().stacks.get(tail).cloned();
        let stack = collector
            .pools_mut()
            .intern_chained(&head, tail_sequence)
            .unwrap();

        assert!(collector.collect_interned(stack));
        assert!(collector.collect_interned(tail));
        assert!(!collector.collect_interned(42));
        assert_eq!(2, collector.sample_count());
        assert_eq!(&[stack, tail], collector.compressed_stack_ptrs());
    }

    #[test]
    fn test_thread_name_is_first_string() {
        let mut collector = ChunkCollector::new(7, "worker-1", 100);
        collector.collect(&frames(&["worker-1"]));
        assert_eq!("worker-1", collector.thread_name());
        assert_eq!(Some(0), collector.pools().strings.index_of("worker-1"));

        collector.close(350);
        assert_eq!(250, collector.duration());
        collector.close(50);
        assert_eq!(0, collector.duration());
    }
}
