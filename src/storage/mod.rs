//! Storage Module
//!
//! The sharded in-memory keyspace (strings and hashes) and its expiry
//! machinery.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  └────┬────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │       │ ExpiryTable (authoritative)                         │
//! │       └ ExpiryHeap  (optional index, heap mode)             │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ sweep_all(now)
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: independent shards reduce lock contention
//! - **RwLock**: concurrent readers, exclusive writers, per shard
//! - **Lazy Expiry**: expired keys are evicted when touched
//! - **Active Expiry**: the background sweeper evicts keys nobody touches
//! - **Two Expiry Indexes**: linear scan, or a generation-tagged min-heap
//!
//! ## Example
//!
//! ```
//! use shardkv::storage::{ExpiryMode, Store, ValueType};
//! use bytes::Bytes;
//! use std::time::{Duration, Instant};
//!
//! let store = Store::new(16, ExpiryMode::Heap);
//! let key = Bytes::from("session");
//! let now = Instant::now();
//!
//! let shard = store.shard_for(&key);
//! shard.set_with_deadline(key.clone(), Bytes::from("token"), now + Duration::from_secs(60));
//!
//! assert_eq!(shard.type_of(&key, now), ValueType::String);
//! assert_eq!(store.next_due(), Some(now + Duration::from_secs(60)));
//! ```

pub mod engine;
pub mod expiry;
pub mod heap;
pub mod shard;
pub mod ttl;

pub use engine::{Store, DEFAULT_SHARDS};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use heap::ExpiryHeap;
pub use shard::{Shard, ValueType, WrongType};
pub use ttl::{ExpiryMode, ExpiryTable, TTL_NO_KEY, TTL_NO_TTL};
