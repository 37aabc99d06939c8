//! Connection Handler Module
//!
//! Each client connection runs as one task on the I/O runtime. The task
//! drives two halves concurrently:
//!
//! ```text
//!            ┌──────────── read half ────────────┐
//! socket ───►│ BytesMut ─► parse_request ─► queue │
//!            └──────────────────────┬────────────┘
//!                                   │ Pending (bounded queue, FIFO)
//!            ┌──────── dispatch half ▼───────────┐
//! socket ◄───│ batch ─► WorkerPool ─► write replies in order
//!            └───────────────────────────────────┘
//! ```
//!
//! The dispatch half drains whatever requests are queued, hands them to the
//! worker pool as one batch and writes the replies before taking the next
//! batch. A connection therefore observes its own writes in program order
//! while different connections execute in parallel. The bounded queue stops
//! the reader once too many requests are outstanding.
//!
//! ## Protocol Errors
//!
//! A malformed frame is answered with `-ERR Protocol error: ...`. If the
//! parser names a number of bytes to discard, those are dropped and reading
//! continues. Otherwise the connection is closed once the error reply has
//! been written.

use crate::commands::CommandError;
use crate::connection::pool::WorkerPool;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{parse_request, ParseError, RespValue};
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Read buffer limit: one maximal bulk plus room for its framing
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Requests a connection may have queued before reading pauses
const MAX_PENDING_REQUESTS: usize = 1024;

/// Most requests handed to a worker in one job
const MAX_BATCH: usize = 128;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// An entry in the per-connection queue.
enum Pending {
    /// A reply known without running a command (protocol errors).
    Ready(RespValue),
    /// A framed request waiting for dispatch.
    Request(Vec<Bytes>),
}

/// Handles a single client connection.
///
/// Generic over the stream so sessions can be driven by in-memory mocks
/// as well as TCP sockets.
pub struct ConnectionHandler<S> {
    stream: S,
    peer: String,
    pool: Arc<WorkerPool>,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        pool: Arc<WorkerPool>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            peer: peer.into(),
            pool,
            stats,
        }
    }

    /// Runs the session until the client disconnects or an error occurs.
    pub async fn run(self) -> Result<(), ConnectionError> {
        let Self {
            stream,
            peer,
            pool,
            stats,
        } = self;

        info!(client = %peer, "Client connected");

        let (reader, writer) = tokio::io::split(stream);
        let (queue_tx, queue_rx) = mpsc::channel(MAX_PENDING_REQUESTS);

        let (read_result, write_result) = tokio::join!(
            read_loop(reader, &peer, &stats, queue_tx),
            dispatch_loop(writer, &peer, &pool, &stats, queue_rx),
        );
        let result = read_result.and(write_result);

        match &result {
            Ok(()) => info!(client = %peer, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %peer, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %peer, "Connection reset by client")
                }
                _ => warn!(client = %peer, error = %e, "Connection error"),
            },
        }

        stats.connection_closed();
        result
    }
}

/// Frames requests and queues them in arrival order.
async fn read_loop<R>(
    mut reader: R,
    peer: &str,
    stats: &ConnectionStats,
    queue: mpsc::Sender<Pending>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);

    loop {
        loop {
            let pending = match parse_request(&buffer) {
                Ok(Some((args, consumed))) => {
                    buffer.advance(consumed);
                    trace!(
                        client = %peer,
                        consumed = consumed,
                        remaining = buffer.len(),
                        "Parsed command"
                    );
                    Pending::Request(args)
                }
                Ok(None) => break,
                Err(e) => {
                    let discard = e.discard();
                    warn!(client = %peer, error = %e, discard = discard, "Protocol error");
                    let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                    if discard == 0 {
                        // Best effort: the writer may already be gone.
                        let _ = queue.send(Pending::Ready(reply)).await;
                        return Err(ConnectionError::ParseError(e));
                    }
                    buffer.advance(discard.min(buffer.len()));
                    Pending::Ready(reply)
                }
            };

            queue
                .send(pending)
                .await
                .map_err(|_| ConnectionError::ClientDisconnected)?;
        }

        if buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %peer, size = buffer.len(), "Buffer size limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        if buffer.capacity() - buffer.len() < 1024 {
            buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = reader.read_buf(&mut buffer).await?;
        if n == 0 {
            return if buffer.is_empty() {
                Ok(())
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        stats.bytes_read(n);
        trace!(client = %peer, bytes = n, "Read data");
    }
}

/// Executes queued requests in batches and writes replies in queue order.
async fn dispatch_loop<W>(
    writer: W,
    peer: &str,
    pool: &WorkerPool,
    stats: &ConnectionStats,
    mut queue: mpsc::Receiver<Pending>,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    let mut out = Vec::with_capacity(INITIAL_BUFFER_SIZE);
    let mut batch = Vec::new();

    while let Some(first) = queue.recv().await {
        let mut next = Some(first);
        while let Some(pending) = next.take() {
            match pending {
                Pending::Request(args) => batch.push(args),
                Pending::Ready(reply) => {
                    run_batch(pool, &mut batch, &mut writer, &mut out, stats).await?;
                    write_reply(&reply, &mut writer, &mut out, stats).await?;
                }
            }
            if batch.len() < MAX_BATCH {
                next = queue.try_recv().ok();
            }
        }

        run_batch(pool, &mut batch, &mut writer, &mut out, stats).await?;
        writer.flush().await?;
        trace!(client = %peer, "Flushed replies");
    }

    writer.flush().await?;
    Ok(())
}

/// Runs the pending batch on the pool and writes its replies.
async fn run_batch<W>(
    pool: &WorkerPool,
    batch: &mut Vec<Vec<Bytes>>,
    writer: &mut BufWriter<W>,
    out: &mut Vec<u8>,
    stats: &ConnectionStats,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let count = batch.len();
    let replies = match pool.submit(std::mem::take(batch)).await {
        Ok(replies) => replies,
        Err(_) => vec![RespValue::from(CommandError::Internal); count],
    };

    for reply in &replies {
        stats.command_processed();
        write_reply(reply, writer, out, stats).await?;
    }
    Ok(())
}

async fn write_reply<W>(
    reply: &RespValue,
    writer: &mut BufWriter<W>,
    out: &mut Vec<u8>,
    stats: &ConnectionStats,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    out.clear();
    reply.serialize_into(out);
    writer.write_all(&out[..]).await?;
    stats.bytes_written(out.len());
    Ok(())
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Unrecoverable framing error
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client went away while replies were pending
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles an accepted TCP client to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    pool: Arc<WorkerPool>,
    stats: Arc<ConnectionStats>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let handler = ConnectionHandler::new(stream, addr.to_string(), pool, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
