//! Sharded Store
//!
//! The [`Store`] owns a fixed set of [`Shard`]s and routes every key to one
//! of them. The shard count is chosen at construction and never changes,
//! so a key maps to the same shard for the lifetime of the process.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ strings │ │ strings │ │ strings │ │ strings │           │
//! │  │ hashes  │ │ hashes  │ │ hashes  │ │ hashes  │           │
//! │  │ expiry  │ │ expiry  │ │ expiry  │ │ expiry  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations on different shards never contend. An operation touches
//! exactly one shard lock and releases it before returning, so there is no
//! lock ordering to get wrong.

use crate::storage::shard::Shard;
use crate::storage::ttl::ExpiryMode;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

/// Default number of shards when none is configured.
pub const DEFAULT_SHARDS: usize = 16;

/// All shards of the keyspace.
///
/// This struct is designed to be wrapped in an `Arc` and shared between the
/// worker pool and the expiry sweeper.
///
/// # Example
///
/// ```
/// use shardkv::storage::{ExpiryMode, Store};
/// use bytes::Bytes;
/// use std::time::Instant;
///
/// let store = Store::new(8, ExpiryMode::Linear);
/// let key = Bytes::from("name");
///
/// store.shard_for(&key).set(key.clone(), Bytes::from("alice"));
/// assert_eq!(
///     store.shard_for(&key).get(&key, Instant::now()),
///     Ok(Some(Bytes::from("alice")))
/// );
/// ```
#[derive(Debug)]
pub struct Store {
    shards: Vec<Shard>,
    mode: ExpiryMode,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS, ExpiryMode::default())
    }
}

impl Store {
    /// Creates a store with `shards` partitions. Zero is coerced to one.
    pub fn new(shards: usize, mode: ExpiryMode) -> Self {
        let count = shards.max(1);
        Self {
            shards: (0..count).map(|_| Shard::new(mode)).collect(),
            mode,
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// The shard owning `key`.
    #[inline]
    pub fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_by_index(&self, index: usize) -> Option<&Shard> {
        self.shards.get(index)
    }

    pub fn mode(&self) -> ExpiryMode {
        self.mode
    }

    /// Sweeps every shard in turn, taking one shard lock at a time.
    ///
    /// Returns the total number of keys evicted.
    pub fn sweep_all(&self, now: Instant) -> usize {
        self.shards.iter().map(|shard| shard.sweep(now)).sum()
    }

    /// Earliest deadline across all shards.
    pub fn next_due(&self) -> Option<Instant> {
        self.shards.iter().filter_map(Shard::next_due).min()
    }

    /// Keys held across all shards, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(Shard::is_empty)
    }
}
