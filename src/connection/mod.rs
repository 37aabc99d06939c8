//! Connection Module
//!
//! Client sessions and the command worker pool they dispatch to.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               TCP Listener (main.rs, I/O runtime)           │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() + spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Parse RESP  │───>│ FIFO queue  │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               ▼             │
//! │  ┌─────────────┐                       ┌─────────────┐      │
//! │  │ Send resp   │<──────────────────────│ WorkerPool  │      │
//! │  └─────────────┘                       └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use shardkv::commands::CommandHandler;
//! use shardkv::connection::{handle_connection, ConnectionStats, WorkerPool};
//! use shardkv::storage::Store;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::default());
//! let pool = Arc::new(WorkerPool::new(4, CommandHandler::new(store))?);
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, Arc::clone(&pool), Arc::clone(&stats)));
//! ```

pub mod handler;
pub mod pool;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use pool::WorkerPool;
