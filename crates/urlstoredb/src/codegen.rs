//! Short-code suppliers
//!
//! The store treats code generation as opaque: it asks a [`CodeSupplier`]
//! for a candidate and, if the candidate is taken, asks again with the next
//! attempt index.

use std::time::{SystemTime, UNIX_EPOCH};

use ahash::RandomState;

/// Produces candidate short codes for a long URL
pub trait CodeSupplier {
    /// Candidate for `long_url` on the given (zero-based) attempt
    fn candidate(&mut self, long_url: &str, attempt: u32) -> String;
}

impl<F> CodeSupplier for F
where
    F: FnMut(&str, u32) -> String,
{
    fn candidate(&mut self, long_url: &str, attempt: u32) -> String {
        self(long_url, attempt)
    }
}

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Base62 digits that fit in one u64 hash (62^10 < 2^64)
const DIGITS_PER_HASH: usize = 10;

/// Default supplier: hashes the URL with the attempt index and the current
/// time, then keeps `length` base62 characters.
pub struct HashCodeGenerator {
    length: usize,
    state: RandomState,
}

impl HashCodeGenerator {
    /// Generator producing codes of `length` characters
    pub fn new(length: usize) -> Self {
        Self {
            length,
            state: RandomState::new(),
        }
    }

    /// Code length
    pub fn length(&self) -> usize {
        self.length
    }
}

impl CodeSupplier for HashCodeGenerator {
    fn candidate(&mut self, long_url: &str, attempt: u32) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut code = String::with_capacity(self.length);
        let mut hash = 0u64;
        let mut digits_left = 0;
        let mut block = 0u64;
        while code.len() < self.length {
            if digits_left == 0 {
                hash = self.state.hash_one((long_url, attempt, nanos, block));
                block += 1;
                digits_left = DIGITS_PER_HASH;
            }
            code.push(BASE62[(hash % 62) as usize] as char);
            hash /= 62;
            digits_left -= 1;
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_shape() {
        let mut generator = HashCodeGenerator::new(7);
        let code = generator.candidate("https://example.com", 0);

        assert_eq!(code.len(), 7);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_long_codes_use_several_hashes() {
        let mut generator = HashCodeGenerator::new(25);
        let code = generator.candidate("https://example.com", 0);
        assert_eq!(code.len(), 25);
    }

    #[test]
    fn test_attempts_differ() {
        let mut generator = HashCodeGenerator::new(12);
        let a = generator.candidate("https://example.com", 0);
        let b = generator.candidate("https://example.com", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_closure_supplier() {
        let mut supplier = |url: &str, attempt: u32| format!("{}-{}", url.len(), attempt);
        assert_eq!(supplier.candidate("abc", 2), "3-2");
    }
}
