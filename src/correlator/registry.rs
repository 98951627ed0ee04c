use std::collections::{BTreeMap, BTreeSet};

use crate::timestamp::TimestampKey;

/// Pending frame timestamps, bounded to the most recent `limit` keys.
///
/// Arrival order does not have to match key order; eviction always removes
/// the smallest key regardless of when it was inserted.
#[derive(Debug)]
pub struct FrameArrivalRegistry {
    keys: BTreeSet<TimestampKey>,
    limit: usize,
}

impl FrameArrivalRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            keys: BTreeSet::new(),
            limit: limit.max(1),
        }
    }

    /// Insert a key. Returns the key evicted to stay within the bound, if any.
    pub fn insert(&mut self, key: TimestampKey) -> Option<TimestampKey> {
        self.keys.insert(key);
        if self.keys.len() > self.limit {
            return self.keys.pop_first();
        }
        None
    }

    pub fn first(&self) -> Option<TimestampKey> {
        self.keys.first().copied()
    }

    pub fn pop_first(&mut self) -> Option<TimestampKey> {
        self.keys.pop_first()
    }

    pub fn remove(&mut self, key: TimestampKey) -> bool {
        self.keys.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> Vec<TimestampKey> {
        self.keys.iter().copied().collect()
    }
}

/// Pending inference results keyed by timestamp, same bound and eviction
/// policy as [`FrameArrivalRegistry`]. Inserting an existing key replaces
/// its handle.
#[derive(Debug)]
pub struct ResultArrivalRegistry<H> {
    entries: BTreeMap<TimestampKey, H>,
    limit: usize,
}

impl<H> ResultArrivalRegistry<H> {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            limit: limit.max(1),
        }
    }

    /// Insert or overwrite. Returns the entry evicted to stay within the bound.
    pub fn insert(&mut self, key: TimestampKey, handle: H) -> Option<(TimestampKey, H)> {
        self.entries.insert(key, handle);
        if self.entries.len() > self.limit {
            return self.entries.pop_first();
        }
        None
    }

    pub fn first_key(&self) -> Option<TimestampKey> {
        self.entries.keys().next().copied()
    }

    pub fn pop_first(&mut self) -> Option<(TimestampKey, H)> {
        self.entries.pop_first()
    }

    pub fn remove(&mut self, key: TimestampKey) -> Option<H> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<TimestampKey> {
        self.entries.keys().copied().collect()
    }
}
