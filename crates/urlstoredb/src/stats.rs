//! Store statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters for a store
#[derive(Debug, Default)]
pub struct StoreStats {
    shortened: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    removals: AtomicU64,
    collisions: AtomicU64,
    saves: AtomicU64,
    failed_saves: AtomicU64,
}

impl StoreStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly stored code
    pub fn record_shorten(&self) {
        self.shortened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resolve that found its code
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resolve of an unknown code
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a removal
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a candidate code that was already taken
    pub fn record_collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot write
    pub fn record_save(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot write that failed after all retries
    pub fn record_failed_save(&self) {
        self.failed_saves.fetch_add(1, Ordering::Relaxed);
    }

    /// Codes stored since open
    pub fn shortened(&self) -> u64 {
        self.shortened.load(Ordering::Relaxed)
    }

    /// Successful resolves
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Resolves of unknown codes
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Removed codes
    pub fn removals(&self) -> u64 {
        self.removals.load(Ordering::Relaxed)
    }

    /// Candidate codes rejected as duplicates
    pub fn collisions(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }

    /// Snapshot writes
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Snapshot writes that failed after all retries
    pub fn failed_saves(&self) -> u64 {
        self.failed_saves.load(Ordering::Relaxed)
    }

    /// Fraction of resolves that found their code (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = StoreStats::new();

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_shorten();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.shortened(), 1);
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_hit_ratio_without_traffic() {
        assert_eq!(StoreStats::new().hit_ratio(), 0.0);
    }
}
