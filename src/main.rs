//! ShardKV server entry point.
//!
//! Sets up logging, the sharded store, the expiry sweeper, the command
//! worker pool and the TCP listener, then serves until Ctrl+C.

use clap::Parser;
use shardkv::commands::CommandHandler;
use shardkv::connection::{handle_connection, ConnectionStats, WorkerPool};
use shardkv::storage::{ExpiryConfig, ExpiryMode, ExpirySweeper, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Parser)]
#[command(name = "shardkv", version, about = "sharded in-memory key-value server")]
struct Config {
    /// Address to bind to
    #[arg(long, default_value = shardkv::DEFAULT_HOST, env = "SHARDKV_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shardkv::DEFAULT_PORT, env = "SHARDKV_PORT")]
    port: u16,

    /// Number of keyspace shards. Defaults to the available parallelism.
    #[arg(long, env = "SHARDKV_SHARDS")]
    shards: Option<usize>,

    /// Number of command worker threads. Defaults to one less than the
    /// available parallelism.
    #[arg(long, env = "SHARDKV_WORKERS")]
    workers: Option<usize>,

    /// Milliseconds between background expiry sweeps
    #[arg(long, default_value_t = 200, env = "SHARDKV_SWEEP_INTERVAL_MS")]
    sweep_interval_ms: u64,

    /// Expiry index: `linear` (periodic scan) or `heap` (precise wakeups)
    #[arg(long, default_value_t = ExpiryMode::Linear, env = "SHARDKV_EXPIRY_INDEX")]
    expiry_index: ExpiryMode,
}

impl Config {
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn shard_count(&self) -> usize {
        self.shards.unwrap_or_else(parallelism).max(1)
    }

    fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| parallelism().saturating_sub(1))
            .max(1)
    }
}

fn parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn print_banner(config: &Config) {
    println!(
        r#"
ShardKV v{} - Sharded In-Memory Key-Value Server
──────────────────────────────────────────────────
Listening on     {}
Shards           {}
Workers          {}
Expiry index     {}

Use Ctrl+C to shutdown gracefully.
"#,
        shardkv::VERSION,
        config.bind_address(),
        config.shard_count(),
        config.worker_count(),
        config.expiry_index,
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Shared keyspace
    let store = Arc::new(Store::new(config.shard_count(), config.expiry_index));
    info!(
        shards = store.shard_count(),
        expiry_index = %store.mode(),
        "Store initialized"
    );

    let _sweeper = ExpirySweeper::start(
        Arc::clone(&store),
        ExpiryConfig {
            interval: Duration::from_millis(config.sweep_interval_ms.max(1)),
            ..ExpiryConfig::default()
        },
    );

    let pool = Arc::new(WorkerPool::new(
        config.worker_count(),
        CommandHandler::new(Arc::clone(&store)),
    )?);
    info!(workers = pool.size(), "Worker pool started");

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    print_banner(&config);

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&pool), stats) => {}
        result = signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Accepts clients and spawns a session task for each.
async fn accept_loop(
    listener: TcpListener,
    pool: Arc<WorkerPool>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let pool = Arc::clone(&pool);
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, addr, pool, stats));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
