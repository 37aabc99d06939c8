//! Command Worker Pool
//!
//! Command execution is handed off to a fixed set of OS threads so a slow
//! command never stalls the I/O runtime. Jobs flow through an unbounded
//! `crossbeam` channel. A job is a batch of requests from one connection,
//! executed in order on a single worker, and carries a oneshot sender for
//! the batch's replies.
//!
//! ```text
//!  session ──submit(batch)──► [ crossbeam queue ] ──► shardkv-worker-0
//!     ▲                                           ├─► shardkv-worker-1
//!     └──── oneshot::Receiver<Vec<RespValue>> ◄───┴─► shardkv-worker-N
//! ```
//!
//! A panicking command is caught on its worker and answered with
//! `-ERR server error`; the rest of the batch still runs.

use crate::commands::{CommandError, CommandHandler};
use crate::protocol::RespValue;
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// What a worker runs for each request.
type Executor = Arc<dyn Fn(&[Bytes]) -> RespValue + Send + Sync>;

/// A batch of requests waiting for a worker.
struct Job {
    requests: Vec<Vec<Bytes>>,
    reply: oneshot::Sender<Vec<RespValue>>,
}

/// A fixed-size pool of command workers.
///
/// Dropping the pool closes the queue and joins every worker once the
/// already-queued jobs are done.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("queued", &self.sender.as_ref().map_or(0, |s| s.len()))
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `size` workers (at least one) executing against `handler`.
    pub fn new(size: usize, handler: CommandHandler) -> io::Result<Self> {
        Self::with_executor(size, move |args: &[Bytes]| handler.execute(args))
    }

    /// Spawns `size` workers (at least one) that answer each request with
    /// `execute`.
    pub fn with_executor<F>(size: usize, execute: F) -> io::Result<Self>
    where
        F: Fn(&[Bytes]) -> RespValue + Send + Sync + 'static,
    {
        let execute: Executor = Arc::new(execute);
        let (sender, receiver) = unbounded::<Job>();
        let size = size.max(1);

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = receiver.clone();
            let execute = Arc::clone(&execute);
            let worker = std::thread::Builder::new()
                .name(format!("shardkv-worker-{}", id))
                .spawn(move || worker_loop(id, receiver, execute))?;
            workers.push(worker);
        }

        debug!(workers = size, "Worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues a batch and returns the receiver for its replies, one per
    /// request and in request order.
    ///
    /// If the pool is shutting down the receiver resolves with an error,
    /// which callers treat as a server error.
    pub fn submit(&self, requests: Vec<Vec<Bytes>>) -> oneshot::Receiver<Vec<RespValue>> {
        let (reply, rx) = oneshot::channel();
        if let Some(sender) = &self.sender {
            // On failure the job, and with it the reply sender, is dropped.
            let _ = sender.send(Job { requests, reply });
        }
        rx
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    /// A pool that accepts no work, as seen while shutting down.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        Self {
            sender: None,
            workers: Vec::new(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
        debug!("Worker pool stopped");
    }
}

fn worker_loop(id: usize, jobs: Receiver<Job>, execute: Executor) {
    for job in jobs.iter() {
        let replies = job
            .requests
            .iter()
            .map(|args| {
                panic::catch_unwind(AssertUnwindSafe(|| execute(args))).unwrap_or_else(
                    |_| {
                        error!(worker = id, "Command panicked");
                        RespValue::from(CommandError::Internal)
                    },
                )
            })
            .collect();
        // The session may be gone already.
        let _ = job.reply.send(replies);
    }
}
