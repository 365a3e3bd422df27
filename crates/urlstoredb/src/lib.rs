//! # urlstoredb
//!
//! Embedded URL-shortener store keeping three coordinated indexes over the
//! same set of short codes:
//! - a cuckoo hash table for O(1) worst-case lookup by code
//! - a red-black tree for ascending, range-restricted listing
//! - a bounded min-heap tracking the K most accessed codes
//!
//! Every mutation updates all three under one lock and is followed by an
//! atomic snapshot save; opening a store rebuilds the indexes from that
//! snapshot.

#![warn(missing_docs)]

mod codegen;
mod config;
mod cuckoo;
mod entry;
mod error;
mod frequency;
mod persistence;
mod rbtree;
pub mod snapshot;
mod stats;
mod store;

#[cfg(test)]
mod proptests;

pub use codegen::{CodeSupplier, HashCodeGenerator};
pub use config::{StoreConfig, MAX_CODE_LEN, MAX_SAVE_RETRIES};
pub use cuckoo::{AHashFamily, CuckooHashTable, HashFamily};
pub use entry::UrlEntry;
pub use error::{Error, PersistenceError, Result};
pub use frequency::{FrequencyTracker, Tracked};
pub use persistence::{PersistenceManager, SNAPSHOT_FILE};
pub use rbtree::{OrderedIndex, Range};
pub use snapshot::Snapshot;
pub use stats::StoreStats;
pub use store::UrlStore;
