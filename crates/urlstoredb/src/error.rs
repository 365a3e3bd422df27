//! Error types for urlstoredb

use std::io;

use thiserror::Error;

/// Result type alias for urlstoredb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug, Error)]
pub enum Error {
    /// Short code is not stored
    #[error("short code not found: {0}")]
    NotFound(String),

    /// Short code is already stored
    #[error("duplicate short code: {0}")]
    DuplicateKey(String),

    /// Cuckoo table could not place an entry even after a rehash
    #[error("hash table full at capacity {capacity} even after rehash")]
    TableFull {
        /// Slots per table when the insert gave up
        capacity: usize,
    },

    /// Code supplier never produced an unused code
    #[error("no unique short code after {attempts} attempts")]
    GenerationExhausted {
        /// Number of candidates tried
        attempts: u32,
    },

    /// Snapshot could not be written or read
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Indexes disagree with each other
    #[error("index consistency violation: {0}")]
    Consistency(String),

    /// Long URL rejected before insertion
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Candidate code rejected before insertion
    #[error("invalid short code: {0}")]
    InvalidCode(String),

    /// Store configuration rejected by `StoreConfig::validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Store is closed
    #[error("store is closed")]
    Closed,
}

impl Error {
    /// Errors that signal a logic bug or a broken hash family rather than a
    /// normal operating condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::TableFull { .. } | Error::Consistency(_))
    }

    /// The ordinary negative lookup result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Failures of the snapshot layer
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot bytes do not describe a valid store
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// A record cannot be represented in the snapshot format
    #[error("cannot encode snapshot: {0}")]
    Encode(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Persistence(PersistenceError::Io(err))
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for PersistenceError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        let msg = match err {
            nom::Err::Incomplete(_) => "truncated input".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                format!("{:?} at {} bytes before end", e.code, e.input.len())
            }
        };
        PersistenceError::Corrupt(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::TableFull { capacity: 8 }.is_fatal());
        assert!(Error::Consistency("x".into()).is_fatal());
        assert!(!Error::NotFound("x".into()).is_fatal());
        assert!(!Error::GenerationExhausted { attempts: 3 }.is_fatal());
    }

    #[test]
    fn test_io_error_becomes_persistence() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "disk gone").into();
        assert!(matches!(err, Error::Persistence(PersistenceError::Io(_))));
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound("ab12".into());
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "short code not found: ab12");
    }
}
