//! Command Handler Module
//!
//! The glue between the protocol and the store: it receives framed requests,
//! executes them against the [`Store`](crate::storage::Store), and returns
//! the reply to serialize.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │ Vec<Bytes>
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Arity        │
//! │  - Type checks  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Store / Shard   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - Strings: `SET`, `GET`, `MSET`, `MGET`
//! - Hashes: `HSET`, `HGET`, `HMGET`, `HDEL`, `HEXISTS`, `HLEN`, `HGETALL`
//! - Keys: `DEL`, `EXISTS`, `EXPIRE`, `PEXPIRE`, `TTL`, `PERSIST`, `TYPE`
//! - Server: `PING`, `ECHO`

pub mod error;
pub mod handler;

pub use error::{CommandError, CommandResult};
pub use handler::{Command, CommandHandler};
