//! Deterministic shard assignment for article titles
//!
//! Ownership of a title is never stored. It is recomputed on demand from the
//! exact title bytes and the fixed shard count, so every worker, on every
//! machine and after every restart, agrees on who owns what.
//!
//! The owning shard is the SHA-256 digest of the UTF-8 title, read as one
//! big-endian unsigned integer, modulo the shard count.

use sha2::{Digest, Sha256};

/// Returns the shard index in `[0, total_shards)` that owns `title`
///
/// Pure function of its two inputs. `total_shards` must be at least 1;
/// callers hold a validated [`ShardAssignment`], which guarantees it.
///
/// # Example
///
/// ```
/// use wiki_mapper::partition::assign;
///
/// assert_eq!(assign("Alan Turing", 1), 0);
/// assert_eq!(assign("Alan Turing", 4), assign("Alan Turing", 4));
/// ```
pub fn assign(title: &str, total_shards: u32) -> u32 {
    debug_assert!(total_shards > 0, "total_shards must be positive");
    let modulus = u64::from(total_shards.max(1));

    let digest = Sha256::digest(title.as_bytes());

    // Horner's rule over the digest bytes gives the exact remainder of the
    // 256-bit value without a bignum.
    let remainder = digest
        .iter()
        .fold(0u64, |acc, byte| ((acc << 8) | u64::from(*byte)) % modulus);

    remainder as u32
}

/// The slice of the namespace owned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssignment {
    index: u32,
    total: u32,
}

impl ShardAssignment {
    /// Creates an assignment, returning None unless `index < total`
    pub fn new(index: u32, total: u32) -> Option<Self> {
        if total == 0 || index >= total {
            return None;
        }
        Some(Self { index, total })
    }

    /// An assignment that owns every title
    pub fn single() -> Self {
        Self { index: 0, total: 1 }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Returns true if this worker is entitled to process `title`
    pub fn owns(&self, title: &str) -> bool {
        self.total == 1 || assign(title, self.total) == self.index
    }
}

impl std::fmt::Display for ShardAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {}/{}", self.index, self.total)
    }
}
