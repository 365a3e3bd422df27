//! Two-table cuckoo hash table
//!
//! Every key lives in exactly one of two slots, `T1[h1(key)]` or
//! `T2[h2(key)]`, so a lookup is at most two probes. An insert that finds
//! its slot taken evicts the occupant into the occupant's slot in the other
//! table, and so on. A chain longer than `max_kicks` is undone and the table
//! is rebuilt at twice the capacity with freshly seeded hash functions.

use std::borrow::Borrow;
use std::fmt::Display;
use std::hash::Hash;

use ahash::RandomState;
use tracing::debug;

use crate::error::{Error, Result};

/// Smallest number of slots per table
pub const MIN_CAPACITY: usize = 8;

/// Floor for the displacement bound on small tables
const MIN_KICKS: usize = 16;

/// Grow before the two tables together are more than this full
const MAX_LOAD_PERCENT: usize = 45;

/// Hash families tried per rebuild before reporting `TableFull`
const MAX_REBUILD_ATTEMPTS: u32 = 8;

type Slot<K, V> = Option<(K, V)>;

/// A pair of hash functions that can be swapped out on rehash
pub trait HashFamily {
    /// Hash `key` with function `which` (0 for T1, 1 for T2)
    fn hash<Q: Hash + ?Sized>(&self, which: usize, key: &Q) -> u64;

    /// Replace both functions with fresh, independent ones
    fn reseed(&mut self);
}

/// ahash-backed family. Each generation derives two independently seeded
/// `RandomState`s from a 64-bit seed.
#[derive(Clone)]
pub struct AHashFamily {
    seed: u64,
    states: [RandomState; 2],
}

impl AHashFamily {
    /// Family seeded from process-random state
    pub fn new() -> Self {
        Self::with_seed(RandomState::new().hash_one(0x5eed_u64))
    }

    /// Deterministic family, mostly useful in tests and benchmarks
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            states: Self::derive(seed),
        }
    }

    fn derive(seed: u64) -> [RandomState; 2] {
        let mut state = seed;
        let mut next = || {
            state = splitmix64(state);
            state
        };
        [
            RandomState::with_seeds(next(), next(), next(), next()),
            RandomState::with_seeds(next(), next(), next(), next()),
        ]
    }
}

impl Default for AHashFamily {
    fn default() -> Self {
        Self::new()
    }
}

impl HashFamily for AHashFamily {
    fn hash<Q: Hash + ?Sized>(&self, which: usize, key: &Q) -> u64 {
        self.states[which].hash_one(key)
    }

    fn reseed(&mut self) {
        self.seed = splitmix64(self.seed ^ 0xa076_1d64_78bd_642f);
        self.states = Self::derive(self.seed);
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn empty_tables<K, V>(capacity: usize) -> [Vec<Slot<K, V>>; 2] {
    std::array::from_fn(|_| (0..capacity).map(|_| None).collect())
}

/// Cuckoo hash table with two tables of equal, power-of-two capacity
pub struct CuckooHashTable<K, V, F = AHashFamily> {
    tables: [Vec<Slot<K, V>>; 2],
    family: F,
    len: usize,
    rehashes: u64,
}

impl<K, V> CuckooHashTable<K, V, AHashFamily> {
    /// Create a table with at least `capacity` slots per table
    pub fn new(capacity: usize) -> Self {
        Self::with_family(capacity, AHashFamily::new())
    }
}

impl<K, V, F> CuckooHashTable<K, V, F> {
    /// Create a table using the given hash family
    pub fn with_family(capacity: usize, family: F) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            tables: empty_tables(capacity),
            family,
            len: 0,
            rehashes: 0,
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots per table
    pub fn capacity(&self) -> usize {
        self.tables[0].len()
    }

    /// Number of rebuilds performed so far
    pub fn rehash_count(&self) -> u64 {
        self.rehashes
    }

    /// Displacement bound for the current capacity: 8 * log2(C)
    pub fn max_kicks(&self) -> usize {
        (8 * self.capacity().trailing_zeros() as usize).max(MIN_KICKS)
    }

    /// Iterate over all entries in slot order (T1 first, then T2)
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.tables
            .iter()
            .flat_map(|table| table.iter().filter_map(|slot| slot.as_ref().map(|(k, v)| (k, v))))
    }
}

impl<K, V, F> CuckooHashTable<K, V, F>
where
    K: Hash + Eq,
    F: HashFamily,
{
    fn index<Q: Hash + ?Sized>(&self, which: usize, key: &Q) -> usize {
        (self.family.hash(which, key) as usize) & (self.capacity() - 1)
    }

    /// Two-probe search returning `(table, slot)`
    fn find<Q>(&self, key: &Q) -> Option<(usize, usize)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        (0..2).find_map(|which| {
            let idx = self.index(which, key);
            match &self.tables[which][idx] {
                Some((k, _)) if Borrow::<Q>::borrow(k) == key => Some((which, idx)),
                _ => None,
            }
        })
    }

    /// Look up the value stored under `key`
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (which, idx) = self.find(key)?;
        self.tables[which][idx].as_ref().map(|(_, v)| v)
    }

    /// Check whether `key` is stored
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Mutate the stored value in place; the entry keeps its slot
    pub fn update<Q, R>(&mut self, key: &Q, f: impl FnOnce(&mut V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (which, idx) = self.find(key)?;
        self.tables[which][idx].as_mut().map(|(_, v)| f(v))
    }

    /// Remove `key`, returning its value
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (which, idx) = self.find(key)?;
        let (_, value) = self.tables[which][idx].take()?;
        self.len -= 1;
        Some(value)
    }

    /// Walk the displacement chain for `item`. On failure every swap is
    /// reverted and the carried item is handed back.
    fn place(&mut self, item: (K, V)) -> std::result::Result<(), (K, V)> {
        let max_kicks = self.max_kicks();
        let mut path: Vec<(usize, usize)> = Vec::with_capacity(max_kicks);
        let mut carried = item;
        let mut which = 0;

        for _ in 0..max_kicks {
            let idx = self.index(which, &carried.0);
            let slot = &mut self.tables[which][idx];
            if let Some(occupant) = slot.as_mut() {
                std::mem::swap(occupant, &mut carried);
                path.push((which, idx));
                which ^= 1;
                continue;
            }
            *slot = Some(carried);
            return Ok(());
        }

        for (which, idx) in path.into_iter().rev() {
            if let Some(occupant) = self.tables[which][idx].as_mut() {
                std::mem::swap(occupant, &mut carried);
            }
        }
        Err(carried)
    }
}

impl<K, V, F> CuckooHashTable<K, V, F>
where
    K: Hash + Eq + Clone + Display,
    V: Clone,
    F: HashFamily + Clone,
{
    /// Insert a new key
    ///
    /// Fails with `DuplicateKey` if the key is already stored, and with
    /// `TableFull` only if no rebuilt table can place the entry.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if self.contains_key(&key) {
            return Err(Error::DuplicateKey(key.to_string()));
        }

        if (self.len + 1) * 100 > 2 * self.capacity() * MAX_LOAD_PERCENT {
            return self.grow(self.capacity() * 2, (key, value));
        }

        let item = match self.place((key, value)) {
            Ok(()) => {
                self.len += 1;
                return Ok(());
            }
            Err(item) => item,
        };

        debug!(
            key = %item.0,
            capacity = self.capacity(),
            max_kicks = self.max_kicks(),
            "displacement chain exhausted, rehashing"
        );
        self.grow(self.capacity() * 2, item)
    }

    /// Rebuild at `capacity` with `pending` added, reseeding until every
    /// entry fits. The current tables are left untouched on failure.
    fn grow(&mut self, capacity: usize, pending: (K, V)) -> Result<()> {
        let mut family = self.family.clone();
        for attempt in 1..=MAX_REBUILD_ATTEMPTS {
            family.reseed();
            if let Some(next) = self.rebuild(capacity, family.clone(), &pending) {
                debug!(
                    from = self.capacity(),
                    to = capacity,
                    entries = next.len,
                    attempt,
                    "cuckoo table rebuilt"
                );
                *self = next;
                return Ok(());
            }
            debug!(capacity, attempt, "rebuild failed, trying another seed");
        }
        Err(Error::TableFull { capacity })
    }

    /// Reinsert every entry plus `pending` into fresh tables of `capacity`
    /// slots hashed by `family`
    fn rebuild(&self, capacity: usize, family: F, pending: &(K, V)) -> Option<Self> {
        let mut next = CuckooHashTable {
            tables: empty_tables(capacity),
            family,
            len: 0,
            rehashes: self.rehashes + 1,
        };

        for (key, value) in self.iter().chain(std::iter::once((&pending.0, &pending.1))) {
            next.place((key.clone(), value.clone())).ok()?;
            next.len += 1;
        }
        Some(next)
    }
}
