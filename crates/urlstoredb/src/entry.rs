//! The logical record stored for every short code

use chrono::{DateTime, SubsecRound, Utc};

/// A short code and the long URL it redirects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntry {
    /// Unique, immutable once assigned
    pub short_code: String,
    /// Redirect target
    pub long_url: String,
    /// When the code was first handed out
    pub created_at: DateTime<Utc>,
    /// Successful resolves so far
    pub access_count: u64,
    /// Store-wide insertion ordinal; breaks ties between equal access counts
    pub sequence: u64,
}

impl UrlEntry {
    /// Create a fresh entry with no recorded accesses
    ///
    /// `created_at` is kept at millisecond precision, the resolution
    /// snapshots store.
    pub fn new(short_code: impl Into<String>, long_url: impl Into<String>, sequence: u64) -> Self {
        Self {
            short_code: short_code.into(),
            long_url: long_url.into(),
            created_at: Utc::now().trunc_subsecs(3),
            access_count: 0,
            sequence,
        }
    }
}
