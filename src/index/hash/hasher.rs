use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::common::types::IndexKey;

/// Hash function injected into the extendible hash table.
///
/// The directory addresses buckets by the low bits of this 32-bit hash, so
/// the function must be deterministic for the lifetime of the index file.
pub trait KeyHasher: Send + Sync {
    fn hash_key(&self, key: IndexKey) -> u32;
}

/// SipHash-based default, truncated to 32 bits
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyHasher;

impl KeyHasher for DefaultKeyHasher {
    fn hash_key(&self, key: IndexKey) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Maps a key to its own low 32 bits, letting tests steer bucket placement
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKeyHasher;

impl KeyHasher for IdentityKeyHasher {
    fn hash_key(&self, key: IndexKey) -> u32 {
        key as u32
    }
}
