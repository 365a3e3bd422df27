//! Bounded min-heap of the most-accessed short codes
//!
//! The least popular tracked code sits at the root. A key → heap-position
//! map lets a tracked code be re-sifted in O(log K) when its count changes.
//!
//! Popularity order: higher access count first; among equal counts the
//! earlier-inserted code (lower sequence) ranks first. The root is therefore
//! the lowest count and, among those, the most recently inserted code.

use std::cmp::Ordering;
use std::collections::HashMap;

use ahash::RandomState;

/// A code held by the tracker together with the count it was last seen at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked {
    /// Short code
    pub key: String,
    /// Access count at the last reconciliation
    pub count: u64,
    /// Insertion ordinal of the entry, used for tie-breaking
    pub sequence: u64,
}

impl Tracked {
    /// `Less` means `self` ranks ahead of `other`
    fn rank(&self, other: &Self) -> Ordering {
        other
            .count
            .cmp(&self.count)
            .then(self.sequence.cmp(&other.sequence))
    }

    fn less_popular(&self, other: &Self) -> bool {
        self.rank(other) == Ordering::Greater
    }
}

/// Top-K tracker backed by an indexed binary min-heap
pub struct FrequencyTracker {
    heap: Vec<Tracked>,
    positions: HashMap<String, usize, RandomState>,
    capacity: usize,
}

impl FrequencyTracker {
    /// Create a tracker holding at most `capacity` codes
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            capacity,
        }
    }

    /// Maximum number of tracked codes (K)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked codes
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Check whether `key` is currently tracked
    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    /// Count the tracker holds for `key`, if tracked
    pub fn count_of(&self, key: &str) -> Option<u64> {
        self.positions.get(key).map(|&pos| self.heap[pos].count)
    }

    /// The least popular tracked code
    pub fn min(&self) -> Option<&Tracked> {
        self.heap.first()
    }

    /// Tracked codes in heap order
    pub fn iter(&self) -> impl Iterator<Item = &Tracked> + '_ {
        self.heap.iter()
    }

    /// Reconcile the heap with the authoritative `count` of `key`
    ///
    /// Returns whether the key is tracked afterwards. A key that is not yet
    /// tracked only displaces the root when its count is strictly greater.
    pub fn record(&mut self, key: &str, count: u64, sequence: u64) -> bool {
        if let Some(&pos) = self.positions.get(key) {
            self.heap[pos].count = count;
            self.heap[pos].sequence = sequence;
            self.sift(pos);
            return true;
        }

        if count == 0 || self.capacity == 0 {
            return false;
        }

        let candidate = Tracked {
            key: key.to_string(),
            count,
            sequence,
        };

        if self.heap.len() < self.capacity {
            let pos = self.heap.len();
            self.positions.insert(candidate.key.clone(), pos);
            self.heap.push(candidate);
            self.sift_up(pos);
            return true;
        }

        match self.heap.first() {
            Some(root) if count > root.count => {
                let evicted = std::mem::replace(&mut self.heap[0], candidate);
                self.positions.remove(&evicted.key);
                self.positions.insert(self.heap[0].key.clone(), 0);
                self.sift_down(0);
                true
            }
            _ => false,
        }
    }

    /// Stop tracking `key`. Returns whether it was tracked.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(pos) = self.positions.remove(key) else {
            return false;
        };
        self.heap.swap_remove(pos);
        if pos < self.heap.len() {
            if let Some(moved) = self.positions.get_mut(&self.heap[pos].key) {
                *moved = pos;
            }
            self.sift(pos);
        }
        true
    }

    /// Replace the tracked set with the top K of `entries`
    ///
    /// Candidates are ranked as a whole, so the result does not depend on
    /// iteration order. Zero counts are skipped.
    pub fn rebuild<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a str, u64, u64)>,
    {
        self.rebuild_keeping(entries, |_| false);
    }

    /// Like [`rebuild`](Self::rebuild), but among equal counts at the K
    /// boundary codes for which `incumbent` holds are kept first
    ///
    /// Passing the previously tracked set reproduces it exactly whenever it
    /// was a valid top K, since live updates never let an equal count
    /// displace a tracked code.
    pub fn rebuild_keeping<'a, I, P>(&mut self, entries: I, incumbent: P)
    where
        I: IntoIterator<Item = (&'a str, u64, u64)>,
        P: Fn(&str) -> bool,
    {
        let mut candidates: Vec<(bool, Tracked)> = entries
            .into_iter()
            .filter(|&(_, count, _)| count > 0)
            .map(|(key, count, sequence)| {
                let tracked = Tracked {
                    key: key.to_string(),
                    count,
                    sequence,
                };
                (incumbent(key), tracked)
            })
            .collect();
        candidates.sort_by(|(a_kept, a), (b_kept, b)| {
            b.count
                .cmp(&a.count)
                .then(b_kept.cmp(a_kept))
                .then(a.sequence.cmp(&b.sequence))
        });
        candidates.truncate(self.capacity);

        self.positions.clear();
        self.heap.clear();
        for (_, candidate) in candidates {
            let pos = self.heap.len();
            self.positions.insert(candidate.key.clone(), pos);
            self.heap.push(candidate);
            self.sift_up(pos);
        }
    }

    /// All tracked codes, most popular first
    pub fn top_k(&self) -> Vec<Tracked> {
        let mut sorted = self.heap.clone();
        sorted.sort_by(Tracked::rank);
        sorted
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        if let Some(pos) = self.positions.get_mut(&self.heap[a].key) {
            *pos = a;
        }
        if let Some(pos) = self.positions.get_mut(&self.heap[b].key) {
            *pos = b;
        }
    }

    fn sift(&mut self, pos: usize) {
        let pos = self.sift_up(pos);
        self.sift_down(pos);
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.heap[pos].less_popular(&self.heap[parent]) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.heap[left].less_popular(&self.heap[smallest]) {
                smallest = left;
            }
            if right < len && self.heap[right].less_popular(&self.heap[smallest]) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.heap.len() > self.capacity {
            return Err(format!("{} tracked, capacity {}", self.heap.len(), self.capacity));
        }
        if self.positions.len() != self.heap.len() {
            return Err("position map out of sync".to_string());
        }
        for (pos, tracked) in self.heap.iter().enumerate() {
            if self.positions.get(&tracked.key) != Some(&pos) {
                return Err(format!("stale position for {}", tracked.key));
            }
            if pos > 0 && tracked.less_popular(&self.heap[(pos - 1) / 2]) {
                return Err(format!("heap order broken at {}", pos));
            }
        }
        Ok(())
    }
}
