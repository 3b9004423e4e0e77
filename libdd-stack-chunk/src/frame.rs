// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constant_pool::{ConstantPool, NO_INDEX};
use crate::ChunkError;
use std::cell::OnceCell;
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};

/// One captured stack frame as handed over by the instrumentation: the
/// declaring type, the method and the source line.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub line: i32,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>, line: i32) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            line,
        }
    }
}

/// A frame whose names were resolved from a chunk's string pool.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ResolvedFrame<'a> {
    pub class_name: &'a str,
    pub method_name: &'a str,
    pub line: i32,
}

impl ResolvedFrame<'_> {
    pub fn to_owned_frame(&self) -> StackFrame {
        StackFrame::new(self.class_name, self.method_name, self.line)
    }
}

impl PartialEq<StackFrame> for ResolvedFrame<'_> {
    fn eq(&self, other: &StackFrame) -> bool {
        self.class_name == other.class_name
            && self.method_name == other.method_name
            && self.line == other.line
    }
}

/// An interned frame. The owner and method are string pool indices, so two
/// frames built from the same strings and line are equal even when captured
/// separately.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FrameElement {
    pub owner: i32,
    pub method: i32,
    pub line: i32,
}

impl FrameElement {
    pub const fn new(owner: i32, method: i32, line: i32) -> Self {
        Self {
            owner,
            method,
            line,
        }
    }

    /// Returns `None` when either name is missing from `strings`.
    pub fn resolve<'a>(&self, strings: &'a ConstantPool<String>) -> Option<ResolvedFrame<'a>> {
        Some(ResolvedFrame {
            class_name: strings.get(self.owner)?,
            method_name: strings.get(self.method)?,
            line: self.line,
        })
    }
}

/// A captured call stack: frame pool indices ordered leaf first, optionally
/// continued by another pooled sequence holding the remaining root-ward
/// frames.
///
/// Equality and hashing are structural over the frame indices and the
/// subsequence index, so the stack pool collapses identical stacks. Note
/// that a flat sequence and a chained one describing the same frames are
/// distinct pool entries.
///
/// The total length and the hash are computed at most once.
#[derive(Clone, Debug)]
pub struct FrameSequence {
    frames: Box<[i32]>,
    subsequence: i32,
    length: OnceCell<usize>,
    hash: OnceCell<u64>,
}

impl FrameSequence {
    /// A sequence owning all of its frames.
    pub fn flat(frames: impl Into<Box<[i32]>>) -> Self {
        let frames = frames.into();
        let length = OnceCell::from(frames.len());
        Self {
            frames,
            subsequence: NO_INDEX,
            length,
            hash: OnceCell::new(),
        }
    }

    /// A one frame head continued by the pooled sequence at `subsequence`,
    /// whose length is `subsequence_length`. Pass `None` to build a single
    /// frame sequence.
    pub fn chained(head: i32, subsequence: Option<(i32, usize)>) -> Self {
        let (subsequence, tail_length) = subsequence.unwrap_or((NO_INDEX, 0));
        Self {
            frames: Box::new([head]),
            subsequence,
            length: OnceCell::from(1 + tail_length),
            hash: OnceCell::new(),
        }
    }

    /// A sequence as decoded from the wire. Its length stays unknown until
    /// the subsequence chain can be resolved.
    pub fn from_parts(
        frames: impl Into<Box<[i32]>>,
        subsequence: i32,
    ) -> Result<Self, ChunkError> {
        let frames = frames.into();
        if frames.is_empty() && subsequence != NO_INDEX {
            return Err(ChunkError::InvalidSequence(subsequence));
        }
        let length = OnceCell::new();
        if subsequence < 0 {
            let _ = length.set(frames.len());
        }
        Ok(Self {
            frames,
            subsequence: subsequence.max(NO_INDEX),
            length,
            hash: OnceCell::new(),
        })
    }

    /// The frame indices held directly by this sequence.
    #[inline]
    pub fn frames(&self) -> &[i32] {
        &self.frames
    }

    #[inline]
    pub fn subsequence(&self) -> Option<i32> {
        (self.subsequence >= 0).then_some(self.subsequence)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The total number of frames including the subsequence chain. Returns
    /// `None` while a link of the chain is missing from `stacks`, or when the
    /// chain loops back on itself; the value is cached once it could be
    /// computed.
    pub fn length(&self, stacks: &ConstantPool<FrameSequence>) -> Option<usize> {
        if let Some(length) = self.length.get() {
            return Some(*length);
        }
        let mut length = self.frames.len();
        let mut next = self.subsequence();
        let mut hops = 0;
        while let Some(index) = next {
            hops += 1;
            if hops > stacks.size() {
                return None;
            }
            let sequence = stacks.get(index)?;
            if let Some(rest) = sequence.length.get() {
                length += rest;
                break;
            }
            length += sequence.frames.len();
            next = sequence.subsequence();
        }
        Some(*self.length.get_or_init(|| length))
    }

    /// Iterates over the frame indices from the leaf to the root. A missing
    /// link in the chain ends the iteration.
    pub fn frames_from_leaves<'a>(
        &'a self,
        stacks: &'a ConstantPool<FrameSequence>,
    ) -> FramesFromLeaves<'a> {
        FramesFromLeaves {
            stacks,
            current: Some(self),
            position: 0,
        }
    }

    /// Iterates over the frame indices from the root to the leaf.
    pub fn frames_from_root<'a>(
        &'a self,
        stacks: &'a ConstantPool<FrameSequence>,
    ) -> impl Iterator<Item = i32> + 'a {
        let mut segments = vec![self.frames()];
        let mut next = self.subsequence();
        while let Some(sequence) = next.and_then(|index| stacks.get(index)) {
            segments.push(sequence.frames());
            next = sequence.subsequence();
        }
        segments
            .into_iter()
            .rev()
            .flat_map(|segment| segment.iter().rev().copied())
    }

    fn structural_hash(&self) -> u64 {
        BuildHasherDefault::<rustc_hash::FxHasher>::default()
            .hash_one((&self.frames, self.subsequence))
    }
}

impl PartialEq for FrameSequence {
    fn eq(&self, other: &Self) -> bool {
        self.subsequence == other.subsequence && self.frames == other.frames
    }
}

impl Eq for FrameSequence {}

impl Hash for FrameSequence {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(*self.hash.get_or_init(|| self.structural_hash()));
    }
}

/// Leaf-first iterator returned by [`FrameSequence::frames_from_leaves`].
pub struct FramesFromLeaves<'a> {
    stacks: &'a ConstantPool<FrameSequence>,
    current: Option<&'a FrameSequence>,
    position: usize,
}

impl Iterator for FramesFromLeaves<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sequence = self.current?;
            if let Some(frame) = sequence.frames.get(self.position) {
                self.position += 1;
                return Some(*frame);
            }
            self.position = 0;
            self.current = sequence
                .subsequence()
                .and_then(|index| self.stacks.get(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(sequences: Vec<FrameSequence>) -> (ConstantPool<FrameSequence>, Vec<i32>) {
        let mut pool = ConstantPool::new();
        let indices = sequences
            .into_iter()
            .map(|s| pool.get_or_insert(s))
            .collect();
        (pool, indices)
    }

    #[test]
    fn test_frame_element_equality() {
        let a = FrameElement::new(1, 2, 10);
        let b = FrameElement::new(1, 2, 10);
        let mut pool = ConstantPool::new();
        assert_eq!(pool.get_or_insert(a), pool.get_or_insert(b));
        assert_ne!(a, FrameElement::new(1, 2, 11));
    }

    #[test]
    fn test_resolve() {
        let mut strings = ConstantPool::new();
        let owner = strings.get_or_insert_with("com.example.Foo");
        let method = strings.get_or_insert_with("bar");
        let frame = FrameElement::new(owner, method, 42);
        let resolved = frame.resolve(&strings).unwrap();
        assert_eq!(
            StackFrame::new("com.example.Foo", "bar", 42),
            resolved.to_owned_frame()
        );
        assert_eq!(None, FrameElement::new(owner, 99, 1).resolve(&strings));
    }

    #[test]
    fn test_structural_equality() {
        let a = FrameSequence::flat(vec![1, 2, 3]);
        let b = FrameSequence::from_parts(vec![1, 2, 3], NO_INDEX).unwrap();
        assert_eq!(a, b);

        let (pool, indices) = pool_with(vec![a, b, FrameSequence::flat(vec![3, 2, 1])]);
        assert_eq!(indices[0], indices[1]);
        assert_ne!(indices[0], indices[2]);
        assert_eq!(2, pool.size());
    }

    #[test]
    fn test_empty_sequence_cannot_continue() {
        assert!(matches!(
            FrameSequence::from_parts(Vec::new(), 3),
            Err(ChunkError::InvalidSequence(3))
        ));
        let empty = FrameSequence::from_parts(Vec::new(), NO_INDEX).unwrap();
        assert!(empty.is_empty());
        assert_eq!(None, empty.subsequence());
    }

    #[test]
    fn test_chained_traversal() {
        let mut pool = ConstantPool::new();
        let tail = pool.get_or_insert(FrameSequence::flat(vec![20, 30]));
        let middle = pool.get_or_insert(FrameSequence::chained(10, Some((tail, 2))));
        let top = FrameSequence::chained(5, Some((middle, 3)));

        assert_eq!(Some(4), top.length(&pool));
        assert_eq!(
            vec![5, 10, 20, 30],
            top.frames_from_leaves(&pool).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![30, 20, 10, 5],
            top.frames_from_root(&pool).collect::<Vec<_>>()
        );

        // Every call starts a fresh traversal.
        let mut first = top.frames_from_leaves(&pool);
        first.next();
        assert_eq!(4, top.frames_from_leaves(&pool).count());
    }

    #[test]
    fn test_single_frame_chain() {
        let pool = ConstantPool::new();
        let sequence = FrameSequence::chained(7, None);
        assert_eq!(None, sequence.subsequence());
        assert_eq!(Some(1), sequence.length(&pool));
        assert_eq!(sequence, FrameSequence::flat(vec![7]));
    }

    #[test]
    fn test_deferred_length() {
        let mut pool = ConstantPool::new();
        pool.insert(0, FrameSequence::from_parts(vec![1, 2], 1).unwrap())
            .unwrap();
        assert_eq!(None, pool.get(0).unwrap().length(&pool));

        pool.insert(1, FrameSequence::from_parts(vec![3, 4, 5], 2).unwrap())
            .unwrap();
        pool.insert(2, FrameSequence::from_parts(vec![6], NO_INDEX).unwrap())
            .unwrap();
        assert_eq!(Some(6), pool.get(0).unwrap().length(&pool));
        assert_eq!(
            vec![6, 5, 4, 3, 2, 1],
            pool.get(0)
                .unwrap()
                .frames_from_root(&pool)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_cyclic_chain_has_no_length() {
        let mut pool = ConstantPool::new();
        pool.insert(0, FrameSequence::from_parts(vec![1], 1).unwrap())
            .unwrap();
        pool.insert(1, FrameSequence::from_parts(vec![2], 0).unwrap())
            .unwrap();
        assert_eq!(None, pool.get(0).unwrap().length(&pool));
    }
}
