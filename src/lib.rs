//! # ShardKV - A Sharded In-Memory Key-Value Server
//!
//! ShardKV speaks the Redis wire protocol (RESP) and stores strings and
//! hashes in a sharded in-memory keyspace with per-key expiry.
//!
//! ## Features
//!
//! - **Redis-Compatible**: RESP request framing and Redis reply texts
//! - **Sharded Storage**: each shard has its own lock, no operation spans two
//! - **TTL Support**: lazy eviction on access plus a background sweeper
//! - **Two Expiry Indexes**: periodic linear scan, or a generation-tagged
//!   min-heap that lets the sweeper wake exactly when the next key is due
//! - **Worker Pool**: commands run off the I/O runtime, replies stay in order
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ShardKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│ WorkerPool  │                  │
//! │  │ (Listener)  │    │  Handler    │    │ (threads)   │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │ CommandHandler          │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   RESP      │    │                    Store                     │    │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │    │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use shardkv::commands::CommandHandler;
//! use shardkv::connection::{handle_connection, ConnectionStats, WorkerPool};
//! use shardkv::storage::{ExpiryConfig, ExpiryMode, ExpirySweeper, Store};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(Store::new(16, ExpiryMode::Heap));
//!     let _sweeper = ExpirySweeper::start(Arc::clone(&store), ExpiryConfig::default());
//!
//!     let pool = Arc::new(WorkerPool::new(4, CommandHandler::new(store))?);
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, Arc::clone(&pool), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `GET key`
//! - `MSET key value [key value ...]`
//! - `MGET key [key ...]`
//!
//! ### Hash Commands
//! - `HSET key field value [field value ...]`
//! - `HGET key field` / `HMGET key field [field ...]`
//! - `HDEL key field [field ...]`
//! - `HEXISTS key field` / `HLEN key` / `HGETALL key`
//!
//! ### Key Commands
//! - `DEL key [key ...]` / `EXISTS key [key ...]`
//! - `EXPIRE key seconds` / `PEXPIRE key milliseconds`
//! - `TTL key` / `PERSIST key` / `TYPE key`
//!
//! ### Server Commands
//! - `PING [message]` / `ECHO message`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request framing, reply values and serialization
//! - [`storage`]: shards, the store and the expiry machinery
//! - [`commands`]: the command table and handlers
//! - [`connection`]: client sessions and the worker pool

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler};
pub use connection::{handle_connection, ConnectionStats, WorkerPool};
pub use protocol::{parse_request, ParseError, RespValue};
pub use storage::{ExpiryConfig, ExpiryMode, ExpirySweeper, Store};

/// The default port ShardKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host ShardKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ShardKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
