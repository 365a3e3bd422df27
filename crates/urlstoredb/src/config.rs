//! Store configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Longest short code accepted from a code supplier, in bytes
pub const MAX_CODE_LEN: usize = 64;

/// Most extra attempts a failed snapshot write may get
pub const MAX_SAVE_RETRIES: u32 = 16;

/// Tunables for a [`crate::UrlStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Directory holding the snapshot
    pub data_dir: PathBuf,
    /// Initial slots per cuckoo table (rounded up to a power of two)
    pub initial_capacity: usize,
    /// Number of codes the frequency tracker keeps (K)
    pub top_k: usize,
    /// Candidates requested from the code supplier before giving up
    pub max_code_attempts: u32,
    /// Extra attempts for a failed snapshot write
    pub save_retries: u32,
    /// Delay before the first save retry, doubled for each further one
    pub save_backoff: Duration,
    /// Persist after every N-th successful resolve
    pub access_save_interval: u64,
    /// Longest long URL accepted, in bytes
    pub max_url_len: usize,
    /// Length of codes produced by the default generator
    pub code_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            initial_capacity: 1024,
            top_k: 10,
            max_code_attempts: 8,
            save_retries: 3,
            save_backoff: Duration::from_millis(10),
            access_save_interval: 1,
            max_url_len: 8192,
            code_length: 7,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `data_dir`
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the initial cuckoo table capacity
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set K for the popularity tracker
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the code generation attempt bound
    pub fn with_max_code_attempts(mut self, attempts: u32) -> Self {
        self.max_code_attempts = attempts;
        self
    }

    /// Set the save retry policy
    pub fn with_save_retry(mut self, retries: u32, backoff: Duration) -> Self {
        self.save_retries = retries;
        self.save_backoff = backoff;
        self
    }

    /// Persist after every `interval`-th resolve
    pub fn with_access_save_interval(mut self, interval: u64) -> Self {
        self.access_save_interval = interval;
        self
    }

    /// Set the long URL size limit
    pub fn with_max_url_len(mut self, len: usize) -> Self {
        self.max_url_len = len;
        self
    }

    /// Set the default generator's code length
    pub fn with_code_length(mut self, len: usize) -> Self {
        self.code_length = len;
        self
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.initial_capacity == 0 {
            return Err(Error::InvalidConfig("initial_capacity must be > 0".into()));
        }
        if self.top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be > 0".into()));
        }
        if self.max_code_attempts == 0 {
            return Err(Error::InvalidConfig("max_code_attempts must be > 0".into()));
        }
        if self.save_retries > MAX_SAVE_RETRIES {
            return Err(Error::InvalidConfig(format!(
                "save_retries must be at most {}",
                MAX_SAVE_RETRIES
            )));
        }
        if self.access_save_interval == 0 {
            return Err(Error::InvalidConfig("access_save_interval must be > 0".into()));
        }
        if self.max_url_len == 0 {
            return Err(Error::InvalidConfig("max_url_len must be > 0".into()));
        }
        if self.code_length == 0 || self.code_length > MAX_CODE_LEN {
            return Err(Error::InvalidConfig(format!(
                "code_length must be within 1..={}",
                MAX_CODE_LEN
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/urls")
            .with_top_k(3)
            .with_initial_capacity(64)
            .with_access_save_interval(10);

        assert_eq!(config.data_dir, PathBuf::from("/tmp/urls"));
        assert_eq!(config.top_k, 3);
        assert_eq!(config.initial_capacity, 64);
        assert_eq!(config.access_save_interval, 10);
        assert_eq!(config.max_code_attempts, 8);
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let result = StoreConfig::default().with_top_k(0).validate();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unbounded_save_retries() {
        let config = StoreConfig::default().with_save_retry(MAX_SAVE_RETRIES, Duration::from_millis(1));
        config.validate().unwrap();

        let result = config.with_save_retry(u32::MAX, Duration::from_millis(1)).validate();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_long_codes() {
        let result = StoreConfig::default().with_code_length(MAX_CODE_LEN + 1).validate();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
