// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::ChunkError;
use hashbrown::{HashMap, HashTable};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};

type Hasher = BuildHasherDefault<rustc_hash::FxHasher>;

/// The index returned for an absent value. It is never assigned to a value.
pub const NO_INDEX: i32 = -1;

/// A bidirectional interning table. Each distinct value (by equality) gets a
/// non-negative index, assigned in insertion order starting at the pool's
/// starting index, and every index maps back to its value.
///
/// Values are stored once, in `entries`; both lookup directions refer to
/// positions in that vector.
pub struct ConstantPool<T> {
    entries: Vec<(i32, T)>,
    by_value: HashTable<usize>,
    by_index: HashMap<i32, usize, Hasher>,
    next_index: i32,
    hasher: Hasher,
}

impl<T> Default for ConstantPool<T> {
    fn default() -> Self {
        Self::with_starting_index(0)
    }
}

impl<T: fmt::Debug> fmt::Debug for ConstantPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(index, value)| (index, value)))
            .finish()
    }
}

impl<T> ConstantPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool whose first assigned index is `starting_index`, so the
    /// indices below it can be reserved by the caller.
    pub fn with_starting_index(starting_index: i32) -> Self {
        Self {
            entries: Vec::new(),
            by_value: HashTable::new(),
            by_index: HashMap::default(),
            next_index: starting_index.max(0),
            hasher: Hasher::default(),
        }
    }

    /// Returns the number of values currently held.
    #[inline]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The index the next new value will receive. Every index in use is
    /// below it.
    #[inline]
    pub fn next_index(&self) -> i32 {
        self.next_index
    }

    /// Returns the value at `index`, or `None` for negative or unassigned
    /// indices.
    pub fn get(&self, index: i32) -> Option<&T> {
        if index < 0 {
            return None;
        }
        self.by_index
            .get(&index)
            .map(|position| &self.entries[*position].1)
    }

    /// Iterates over `(index, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &T)> + '_ {
        self.entries.iter().map(|(index, value)| (*index, value))
    }
}

impl<T: Eq + Hash> ConstantPool<T> {
    /// Returns the index of a value equal to `key`, if one is held.
    pub fn index_of<Q>(&self, key: &Q) -> Option<i32>
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(key);
        let entries = &self.entries;
        self.by_value
            .find(hash, |position| {
                <T as Borrow<Q>>::borrow(&entries[*position].1) == key
            })
            .map(|position| entries[*position].0)
    }

    /// Interns `value`: returns the index of an equal value if one is held,
    /// otherwise assigns the next index to it.
    ///
    /// # Panics
    /// Panics if the pool runs out of non-negative `i32` indices. That takes
    /// more than two billion distinct values, far beyond what fits into one
    /// chunk.
    pub fn get_or_insert(&mut self, value: T) -> i32 {
        match self.index_of(&value) {
            Some(index) => index,
            None => self.push_new(value),
        }
    }

    /// Like [`Self::get_or_insert`], but only converts the borrowed key into
    /// an owned value when it is not held yet.
    pub fn get_or_insert_with<Q>(&mut self, key: &Q) -> i32
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = T>,
    {
        match self.index_of(key) {
            Some(index) => index,
            None => self.push_new(key.to_owned()),
        }
    }

    /// Interns an optional value, mapping `None` to [`NO_INDEX`] without
    /// storing anything.
    pub fn get_or_insert_optional(&mut self, value: Option<T>) -> i32 {
        match value {
            Some(value) => self.get_or_insert(value),
            None => NO_INDEX,
        }
    }

    fn push_new(&mut self, value: T) -> i32 {
        let index = self.next_index;
        // PANIC: see get_or_insert, exhausting i32 indices is not a
        // recoverable situation for an interning table.
        #[allow(clippy::expect_used)]
        {
            self.next_index = index
                .checked_add(1)
                .expect("ConstantPool index to fit into an i32");
        }
        self.store(index, value);
        index
    }

    fn store(&mut self, index: i32, value: T) {
        let hash = self.hasher.hash_one(&value);
        let position = self.entries.len();
        self.entries.push((index, value));
        self.by_index.insert(index, position);

        let entries = &self.entries;
        let hasher = &self.hasher;
        self.by_value.insert_unique(hash, position, |position| {
            hasher.hash_one(&entries[*position].1)
        });
    }

    /// Places `value` at an explicit index, as read from the wire. The
    /// watermark moves past `index` so later [`Self::get_or_insert`] calls
    /// never collide with it. A value already held at `index` is replaced.
    ///
    /// If an equal value is already held at another index, value lookups
    /// keep returning that earlier index. When the replaced value was the
    /// one found by lookups, an equal value still held at another index
    /// becomes the one found.
    pub fn insert(&mut self, index: i32, value: T) -> Result<(), ChunkError> {
        if index < 0 {
            return Err(ChunkError::NegativeIndex(index));
        }
        if index >= self.next_index {
            self.next_index = index.saturating_add(1);
        }

        let Some(&position) = self.by_index.get(&index) else {
            if self.index_of(&value).is_some() {
                // Only reachable by index.
                self.entries.push((index, value));
                self.by_index.insert(index, self.entries.len() - 1);
            } else {
                self.store(index, value);
            }
            return Ok(());
        };

        let old_hash = self.hasher.hash_one(&self.entries[position].1);
        let owned_lookup = match self.by_value.find_entry(old_hash, |p| *p == position) {
            Ok(entry) => {
                entry.remove();
                true
            }
            Err(_) => false,
        };
        let old = std::mem::replace(&mut self.entries[position].1, value);

        let entries = &self.entries;
        let hasher = &self.hasher;
        if owned_lookup {
            // An equal value held at another index takes over the lookup.
            if let Some(survivor) = entries.iter().position(|(_, v)| *v == old) {
                self.by_value.insert_unique(old_hash, survivor, |p| {
                    hasher.hash_one(&entries[*p].1)
                });
            }
        }

        let new_hash = hasher.hash_one(&entries[position].1);
        let already_held = self
            .by_value
            .find(new_hash, |p| entries[*p].1 == entries[position].1)
            .is_some();
        if !already_held {
            self.by_value.insert_unique(new_hash, position, |p| {
                hasher.hash_one(&entries[*p].1)
            });
        }
        Ok(())
    }
}
