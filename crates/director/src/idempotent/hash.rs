//! SHA-256 seed hashing for deterministic UUID v5 key generation.

use sha2::{Digest, Sha256};

/// Hash an intent seed using SHA-256.
///
/// # Examples
///
/// ```
/// use stage_director::idempotent::hash_seed;
///
/// let hash = hash_seed("gathering:42");
/// assert_eq!(hash.len(), 32);
/// assert_eq!(hash, hash_seed("gathering:42"));
/// ```
#[inline]
#[must_use]
pub fn hash_seed(seed: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_seed_determinism() {
        assert_eq!(hash_seed("seed"), hash_seed("seed"));
    }

    #[test]
    fn test_hash_seed_different_data() {
        assert_ne!(hash_seed("gathering:1"), hash_seed("gathering:2"));
    }

    #[test]
    fn test_hash_seed_empty() {
        assert_eq!(hash_seed("").len(), 32, "Empty seed still produces 32-byte hash");
    }
}
