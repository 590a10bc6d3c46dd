//! Open-addressing hash table used to give tokens dense local ids.
//!
//! Collisions step quadratically over triangular offsets (`h, h+1, h+3, h+6, ...`),
//! which visits every slot exactly once per cycle because the capacity is
//! always a power of two. The table grows by doubling as soon as an insert
//! would bring the load factor to the configured maximum, so at least one
//! slot is always free.

use std::hash::{BuildHasher, BuildHasherDefault, Hash};

use rustc_hash::FxHasher;

use crate::types::{GraphError, Result};

/// Smallest non-zero capacity.
pub const MIN_CAPACITY: usize = 8;
/// Load factor used when none (or a nonsensical one) is configured.
pub const DEFAULT_MAX_LOAD: f32 = 0.8;

#[derive(Clone, Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
}

/// Hash table keyed by tokens, sized in powers of two.
#[derive(Clone, Debug)]
pub struct RenameTable<K, V, S = BuildHasherDefault<FxHasher>> {
    slots: Vec<Option<Entry<K, V>>>,
    len: usize,
    max_load: f32,
    hasher: S,
}

impl<K, V> RenameTable<K, V> {
    /// Creates an empty table that allocates on first insert.
    pub fn new() -> Self {
        Self::with_hasher(BuildHasherDefault::default())
    }
}

impl<K: Hash + Eq, V> RenameTable<K, V> {
    /// Creates a table with room for `capacity` slots (rounded up to a power of two, at least 8).
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut table = Self::new();
        table.initialize(capacity)?;
        Ok(table)
    }
}

impl<K, V> Default for RenameTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> RenameTable<K, V, S> {
    /// Creates an empty table that hashes keys with `hasher`.
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            max_load: DEFAULT_MAX_LOAD,
            hasher,
        }
    }

    /// Sets the load factor that triggers growth. Values outside `(0.001, 1.0]` fall back to 0.8.
    pub fn max_load_factor(mut self, max_load: f32) -> Self {
        self.max_load = if max_load > 1.0 || max_load < 0.001 || max_load.is_nan() {
            DEFAULT_MAX_LOAD
        } else {
            max_load
        };
        self
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots in the backing array; zero before the first insert.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// `len / capacity`, or zero for an unallocated table.
    pub fn load_factor(&self) -> f32 {
        if self.slots.is_empty() {
            return 0.0;
        }
        self.len as f32 / self.slots.len() as f32
    }

    /// Drops every entry but keeps the backing storage.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.len = 0;
    }

    /// Occupied entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|entry| (&entry.key, &entry.value)))
    }

    /// Smallest doubling of the current capacity that holds `len` entries
    /// below the load limit.
    fn grown_capacity(&self, len: usize) -> usize {
        let mut capacity = if self.slots.is_empty() {
            MIN_CAPACITY
        } else {
            self.slots.len().saturating_mul(2)
        };
        while reaches_load(len, capacity, self.max_load) && capacity < usize::MAX / 2 {
            capacity *= 2;
        }
        capacity
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> RenameTable<K, V, S> {
    /// Allocates the backing array. A capacity of zero leaves the table unallocated.
    pub fn initialize(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Ok(());
        }
        self.resize(capacity.max(MIN_CAPACITY))
    }

    /// Looks up `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = find_slot(&self.slots, key, &self.hasher)?;
        self.slots[idx].as_ref().map(|entry| &entry.value)
    }

    /// True when `key` is stored.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites `key`, returning the previous value.
    ///
    /// Fails with [`GraphError::BadAlloc`] when the table has to grow and the
    /// allocation is refused; the table is left unchanged in that case.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        if let Some(idx) = find_slot(&self.slots, &key, &self.hasher) {
            if let Some(entry) = self.slots[idx].as_mut() {
                return Ok(Some(std::mem::replace(&mut entry.value, value)));
            }
        }
        if self.slots.is_empty() || reaches_load(self.len + 1, self.slots.len(), self.max_load) {
            self.resize(self.grown_capacity(self.len + 1))?;
        }
        let idx = find_slot(&self.slots, &key, &self.hasher)
            .ok_or(GraphError::Corruption("rename table has no free slot"))?;
        self.slots[idx] = Some(Entry { key, value });
        self.len += 1;
        Ok(None)
    }

    /// Grows the backing array to at least `capacity` slots and rehashes every entry.
    ///
    /// Shrinking is a no-op.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        if capacity <= self.slots.len() {
            return Ok(());
        }
        let capacity = capacity
            .checked_next_power_of_two()
            .ok_or(GraphError::BadAlloc {
                requested: capacity,
            })?;
        let mut fresh: Vec<Option<Entry<K, V>>> = Vec::new();
        fresh
            .try_reserve_exact(capacity)
            .map_err(GraphError::bad_alloc(capacity))?;
        fresh.resize_with(capacity, || None);

        for entry in std::mem::take(&mut self.slots).into_iter().flatten() {
            // Growth never shrinks, so the fresh array has a free slot for every entry.
            if let Some(idx) = find_slot(&fresh, &entry.key, &self.hasher) {
                fresh[idx] = Some(entry);
            }
        }
        self.slots = fresh;
        Ok(())
    }
}

/// True when holding `len` entries in `capacity` slots meets the load limit
/// or leaves no free slot.
fn reaches_load(len: usize, capacity: usize, max_load: f32) -> bool {
    len >= capacity || len as f32 / capacity as f32 >= max_load
}

impl<K: Hash + Eq, V: Copy, S: BuildHasher> RenameTable<K, V, S> {
    /// Copies the value out, the common case for token -> id lookups.
    pub fn get_copied(&self, key: &K) -> Option<V> {
        self.get(key).copied()
    }
}

/// Returns the slot holding `key`, or the empty slot where it would go.
///
/// `slots` must be a power of two long. Gives `None` for an empty array, or
/// when a full cycle of steps meets neither the key nor a free slot.
fn find_slot<K: Hash + Eq, V, S: BuildHasher>(
    slots: &[Option<Entry<K, V>>],
    key: &K,
    hasher: &S,
) -> Option<usize> {
    if slots.is_empty() {
        return None;
    }
    let mask = slots.len() - 1;
    let home = (hasher.hash_one(key) as usize) & mask;
    for step in 0..slots.len() {
        let idx = home.wrapping_add(triangular(step)) & mask;
        match &slots[idx] {
            Some(entry) if entry.key != *key => continue,
            _ => return Some(idx),
        }
    }
    None
}

#[inline]
fn triangular(i: usize) -> usize {
    i.wrapping_mul(i.wrapping_add(1)) / 2
}
