//! Store facade
//!
//! `UrlStore` exclusively owns the three indexes and the persistence
//! manager. Every mutation runs under one write lock over all indexes, so a
//! half-applied change is never observable; read-only queries share a read
//! lock.
//!
//! The cuckoo table holds the authoritative [`UrlEntry`]. The ordered index
//! stores only keys and the frequency tracker only `(key, count)` pairs;
//! both go back to the table for the entry itself.

use std::collections::HashSet;
use std::ops::Bound;

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::codegen::{CodeSupplier, HashCodeGenerator};
use crate::config::{StoreConfig, MAX_CODE_LEN};
use crate::cuckoo::CuckooHashTable;
use crate::entry::UrlEntry;
use crate::error::{Error, PersistenceError, Result};
use crate::frequency::FrequencyTracker;
use crate::persistence::PersistenceManager;
use crate::rbtree::OrderedIndex;
use crate::snapshot::Snapshot;
use crate::stats::StoreStats;

/// The three indexes plus the bookkeeping that moves with them
struct Indexes {
    table: CuckooHashTable<String, UrlEntry>,
    ordered: OrderedIndex<String, ()>,
    popular: FrequencyTracker,

    /// Sequence number for the next stored entry
    next_sequence: u64,

    /// Resolves since the last successful save
    accesses_since_save: u64,

    /// A save failed and nothing has been saved since
    dirty: bool,

    closed: bool,
}

fn corrupt(msg: String) -> Error {
    Error::Persistence(PersistenceError::Corrupt(msg))
}

impl Indexes {
    fn empty(config: &StoreConfig) -> Self {
        Self {
            table: CuckooHashTable::new(config.initial_capacity),
            ordered: OrderedIndex::new(),
            popular: FrequencyTracker::new(config.top_k),
            next_sequence: 0,
            accesses_since_save: 0,
            dirty: false,
            closed: false,
        }
    }

    /// Rebuild all three indexes from a snapshot, or fail without a
    /// partially built store
    fn from_snapshot(snapshot: Snapshot, config: &StoreConfig) -> Result<Self> {
        let mut indexes = Self::empty(config);
        let mut sequences: HashSet<u64, RandomState> = HashSet::default();

        for entry in snapshot.entries {
            let code = entry.short_code.clone();
            if !sequences.insert(entry.sequence) {
                return Err(corrupt(format!(
                    "sequence {} of {} is used twice",
                    entry.sequence, code
                )));
            }
            let next = entry.sequence.checked_add(1).ok_or_else(|| {
                corrupt(format!("sequence {} of {} is out of range", entry.sequence, code))
            })?;
            indexes.next_sequence = indexes.next_sequence.max(next);
            match indexes.table.insert(code.clone(), entry) {
                Ok(()) => {}
                Err(Error::DuplicateKey(code)) => {
                    return Err(corrupt(format!("short code {} stored twice", code)));
                }
                Err(e) => return Err(e),
            }
            indexes.ordered.insert(code, ());
        }

        for (code, count) in &snapshot.tracked {
            let Some(entry) = indexes.table.get(code.as_str()) else {
                return Err(corrupt(format!("tracked code {} has no entry", code)));
            };
            if entry.access_count != *count {
                return Err(corrupt(format!(
                    "tracked count {} for {} disagrees with entry count {}",
                    count, code, entry.access_count
                )));
            }
        }

        // Derived from the counts; the saved set only settles ties at the
        // K boundary
        let saved: HashSet<&str, RandomState> =
            snapshot.tracked.iter().map(|(code, _)| code.as_str()).collect();
        let table = &indexes.table;
        indexes.popular.rebuild_keeping(
            table.iter().map(|(code, e)| (code.as_str(), e.access_count, e.sequence)),
            |code| saved.contains(code),
        );

        Ok(indexes)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Table lookup for a key some other index referenced
    fn lookup(&self, code: &str) -> Result<&UrlEntry> {
        self.table.get(code).ok_or_else(|| {
            Error::Consistency(format!("{} is indexed but missing from the hash table", code))
        })
    }

    fn entries_for<'a, I>(&self, codes: I) -> Result<Vec<UrlEntry>>
    where
        I: Iterator<Item = &'a String>,
    {
        codes.map(|code| self.lookup(code).cloned()).collect()
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let entries = self.entries_for(self.ordered.iter().map(|(code, _)| code))?;
        let tracked = self
            .popular
            .top_k()
            .into_iter()
            .map(|t| (t.key, t.count))
            .collect();
        Ok(Snapshot { entries, tracked })
    }

    /// Track the best untracked entry after a tracked one went away
    fn refill_tracker(&mut self) {
        let popular = &self.popular;
        let best = self
            .table
            .iter()
            .filter(|(code, e)| e.access_count > 0 && !popular.contains(code.as_str()))
            .min_by(|(_, a), (_, b)| {
                b.access_count
                    .cmp(&a.access_count)
                    .then(a.sequence.cmp(&b.sequence))
            })
            .map(|(code, e)| (code.clone(), e.access_count, e.sequence));

        if let Some((code, count, sequence)) = best {
            self.popular.record(&code, count, sequence);
        }
    }

    fn check(&self) -> Result<()> {
        if self.table.len() != self.ordered.len() {
            return Err(Error::Consistency(format!(
                "hash table holds {} codes, ordered index {}",
                self.table.len(),
                self.ordered.len()
            )));
        }
        // Same size and ordered ⊆ table means the key sets are equal
        for (code, _) in self.ordered.iter() {
            self.lookup(code)?;
        }
        for (code, entry) in self.table.iter() {
            if entry.short_code != *code {
                return Err(Error::Consistency(format!(
                    "slot for {} holds entry {}",
                    code, entry.short_code
                )));
            }
        }

        for tracked in self.popular.iter() {
            let entry = self.lookup(&tracked.key)?;
            if entry.access_count != tracked.count {
                return Err(Error::Consistency(format!(
                    "tracker has {} at {}, table at {}",
                    tracked.key, tracked.count, entry.access_count
                )));
            }
        }

        // No untracked entry may outrank the tracker
        let floor = if self.popular.len() == self.popular.capacity() {
            self.popular.min().map_or(0, |t| t.count)
        } else {
            0
        };
        for (code, entry) in self.table.iter() {
            if entry.access_count > floor && !self.popular.contains(code) {
                return Err(Error::Consistency(format!(
                    "{} has {} accesses but is not tracked (floor {})",
                    code, entry.access_count, floor
                )));
            }
        }
        Ok(())
    }
}

fn validate_code(code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(Error::InvalidCode("empty code".into()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(Error::InvalidCode(format!(
            "{} bytes, max {}",
            code.len(),
            MAX_CODE_LEN
        )));
    }
    if code.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidCode(format!("{:?} contains whitespace", code)));
    }
    Ok(())
}

/// Multi-index URL store: the single entry point for every operation
pub struct UrlStore {
    state: RwLock<Indexes>,
    persistence: PersistenceManager,
    generator: Mutex<HashCodeGenerator>,
    stats: StoreStats,
    config: StoreConfig,
}

impl UrlStore {
    /// Open the store in `config.data_dir`, loading the snapshot if one
    /// exists
    ///
    /// A snapshot that cannot be read or does not describe a consistent
    /// store fails the open; nothing is partially loaded.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let persistence = PersistenceManager::new(&config.data_dir)?
            .with_retry(config.save_retries, config.save_backoff);

        let indexes = match persistence.load()? {
            Some(snapshot) => Indexes::from_snapshot(snapshot, &config)?,
            None => Indexes::empty(&config),
        };

        info!(
            path = %persistence.path().display(),
            entries = indexes.table.len(),
            tracked = indexes.popular.len(),
            "url store opened"
        );

        Ok(Self {
            state: RwLock::new(indexes),
            persistence,
            generator: Mutex::new(HashCodeGenerator::new(config.code_length)),
            stats: StoreStats::new(),
            config,
        })
    }

    /// Store `long_url` under a fresh code obtained from `supplier`
    ///
    /// Taken candidates are retried up to `max_code_attempts` times, after
    /// which `GenerationExhausted` is returned.
    pub fn shorten<S>(&self, long_url: &str, supplier: &mut S) -> Result<UrlEntry>
    where
        S: CodeSupplier + ?Sized,
    {
        if long_url.is_empty() {
            return Err(Error::InvalidUrl("empty url".into()));
        }
        if long_url.len() > self.config.max_url_len {
            return Err(Error::InvalidUrl(format!(
                "{} bytes, max {}",
                long_url.len(),
                self.config.max_url_len
            )));
        }

        let mut state = self.state.write();
        state.ensure_open()?;

        for attempt in 0..self.config.max_code_attempts {
            let code = supplier.candidate(long_url, attempt);
            validate_code(&code)?;

            let entry = UrlEntry::new(code.clone(), long_url, state.next_sequence);
            match state.table.insert(code.clone(), entry.clone()) {
                Ok(()) => {}
                Err(Error::DuplicateKey(_)) => {
                    self.stats.record_collision();
                    debug!(code = %code, attempt, "short code taken, retrying");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "hash table insert failed");
                    return Err(e);
                }
            }

            if state.ordered.insert(code.clone(), ()).is_some() {
                state.table.remove(code.as_str());
                let msg = format!("{} was in the ordered index but not in the hash table", code);
                error!("{}", msg);
                return Err(Error::Consistency(msg));
            }

            state.next_sequence += 1;
            self.stats.record_shorten();
            self.persist_after_mutation(&mut state)?;
            return Ok(entry);
        }

        Err(Error::GenerationExhausted {
            attempts: self.config.max_code_attempts,
        })
    }

    /// [`shorten`](Self::shorten) with the store's own hash-based generator
    pub fn shorten_url(&self, long_url: &str) -> Result<UrlEntry> {
        let mut generator = self.generator.lock();
        self.shorten(long_url, &mut *generator)
    }

    /// Look up `code` and count the access
    ///
    /// Returns the entry with its updated count. An unknown code is
    /// `NotFound` and changes nothing.
    pub fn resolve(&self, code: &str) -> Result<UrlEntry> {
        let mut state = self.state.write();
        state.ensure_open()?;

        let updated = state.table.update(code, |entry| {
            entry.access_count += 1;
            entry.clone()
        });
        let Some(entry) = updated else {
            self.stats.record_miss();
            return Err(Error::NotFound(code.to_string()));
        };

        state.popular.record(code, entry.access_count, entry.sequence);
        self.stats.record_hit();

        state.accesses_since_save += 1;
        if state.accesses_since_save >= self.config.access_save_interval {
            self.persist_after_mutation(&mut state)?;
        }
        Ok(entry)
    }

    /// Look up `code` without counting an access
    pub fn peek(&self, code: &str) -> Result<UrlEntry> {
        let state = self.state.read();
        state.ensure_open()?;
        state
            .table
            .get(code)
            .cloned()
            .ok_or_else(|| Error::NotFound(code.to_string()))
    }

    /// Every entry in ascending code order
    pub fn list_ordered(&self) -> Result<Vec<UrlEntry>> {
        self.list_bounded(Bound::Unbounded, Bound::Unbounded)
    }

    /// Entries with codes in `low..=high`, ascending
    pub fn list_range(&self, low: &str, high: &str) -> Result<Vec<UrlEntry>> {
        self.list_bounded(Bound::Included(low), Bound::Included(high))
    }

    /// Entries with codes between arbitrary bounds, ascending
    pub fn list_bounded(&self, low: Bound<&str>, high: Bound<&str>) -> Result<Vec<UrlEntry>> {
        let state = self.state.read();
        state.ensure_open()?;
        state.entries_for(state.ordered.range(low, high).map(|(code, _)| code))
    }

    /// The most accessed entries, most popular first, at most `limit` of
    /// them (and never more than the tracker's K)
    pub fn popular(&self, limit: usize) -> Result<Vec<UrlEntry>> {
        let state = self.state.read();
        state.ensure_open()?;

        state
            .popular
            .top_k()
            .into_iter()
            .take(limit)
            .map(|tracked| {
                let entry = state.lookup(&tracked.key)?;
                if entry.access_count != tracked.count {
                    return Err(Error::Consistency(format!(
                        "tracker has {} at {}, table at {}",
                        tracked.key, tracked.count, entry.access_count
                    )));
                }
                Ok(entry.clone())
            })
            .collect()
    }

    /// Remove `code` from all three indexes
    pub fn remove(&self, code: &str) -> Result<UrlEntry> {
        let mut state = self.state.write();
        state.ensure_open()?;

        if !state.table.contains_key(code) {
            return Err(Error::NotFound(code.to_string()));
        }
        if !state.ordered.contains_key(code) {
            let msg = format!("{} is in the hash table but not the ordered index", code);
            error!("{}", msg);
            return Err(Error::Consistency(msg));
        }

        let entry = state
            .table
            .remove(code)
            .ok_or_else(|| Error::NotFound(code.to_string()))?;
        state.ordered.remove(code);
        if state.popular.remove(code) {
            state.refill_tracker();
        }

        self.stats.record_removal();
        self.persist_after_mutation(&mut state)?;
        Ok(entry)
    }

    /// Number of stored codes
    pub fn len(&self) -> usize {
        self.state.read().table.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.state.read().table.is_empty()
    }

    /// Operation counters
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current cuckoo table slots per table and rebuild count
    pub fn table_shape(&self) -> (usize, u64) {
        let state = self.state.read();
        (state.table.capacity(), state.table.rehash_count())
    }

    /// Whether the in-memory state is ahead of the snapshot on disk
    pub fn is_dirty(&self) -> bool {
        let state = self.state.read();
        state.dirty || state.accesses_since_save > 0
    }

    /// Write a snapshot now, surfacing any persistence error
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        self.persist(&mut state)
    }

    /// Verify the cross-index invariants
    pub fn check_consistency(&self) -> Result<()> {
        let state = self.state.read();
        state.check().inspect_err(|e| error!(error = %e, "consistency check failed"))
    }

    /// Final save, after which every operation returns `Closed`
    ///
    /// If the save fails the store stays open so the caller can retry.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        self.persist(&mut state)?;
        state.closed = true;
        info!(entries = state.table.len(), "url store closed");
        Ok(())
    }

    fn persist(&self, state: &mut Indexes) -> Result<()> {
        let snapshot = state.snapshot()?;
        match self.persistence.save(&snapshot) {
            Ok(()) => {
                self.stats.record_save();
                state.dirty = false;
                state.accesses_since_save = 0;
                Ok(())
            }
            Err(e) => {
                self.stats.record_failed_save();
                state.dirty = true;
                Err(e.into())
            }
        }
    }

    /// Save after a mutation. A persistence failure is logged and the
    /// in-memory change kept; consistency failures still propagate.
    fn persist_after_mutation(&self, state: &mut Indexes) -> Result<()> {
        match self.persist(state) {
            Err(Error::Persistence(e)) => {
                error!(error = %e, "snapshot save failed, keeping in-memory change");
                Ok(())
            }
            other => other,
        }
    }
}

impl Drop for UrlStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "final snapshot save failed");
        }
    }
}
