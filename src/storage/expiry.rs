//! Background Expiry Sweeper
//!
//! Lazy expiry only removes keys that are touched again. Keys that expire
//! and are never read would stay in memory forever, so this task also
//! evicts them on a schedule ("active expiry").
//!
//! ## Scheduling
//!
//! - **Linear** stores: wake every `interval` (default 200ms) and sweep.
//! - **Heap** stores: wake at the earliest pending deadline, but no sooner
//!   than `min_interval` and no later than `interval`.
//!
//! The sweep itself runs on the blocking pool so shard locks are never held
//! on the I/O thread.

use crate::storage::{ExpiryMode, Store};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Sweep interval, and the longest a heap store sleeps (default: 200ms)
    pub interval: Duration,

    /// Shortest sleep between two sweeps of a heap store (default: 1ms)
    pub min_interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            min_interval: Duration::from_millis(1),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the sweeper on the current tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use shardkv::storage::{ExpiryConfig, ExpiryMode, ExpirySweeper, Store};
    /// use std::sync::Arc;
    ///
    /// let store = Arc::new(Store::new(16, ExpiryMode::Heap));
    /// let sweeper = ExpirySweeper::start(store, ExpiryConfig::default());
    ///
    /// // Dropping the handle stops the task
    /// drop(sweeper);
    /// ```
    pub fn start(store: Arc<Store>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            mode = %store.mode(),
            interval_ms = config.interval.as_millis() as u64,
            "Background expiry sweeper started"
        );

        tokio::spawn(sweeper_loop(store, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the sweeper. Called automatically on drop.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How long to sleep before the next sweep.
fn next_delay(store: &Store, config: &ExpiryConfig, now: Instant) -> Duration {
    match store.mode() {
        ExpiryMode::Linear => config.interval,
        ExpiryMode::Heap => match store.next_due() {
            Some(at) => at
                .saturating_duration_since(now)
                .clamp(config.min_interval, config.interval.max(config.min_interval)),
            None => config.interval,
        },
    }
}

async fn sweeper_loop(
    store: Arc<Store>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut delay = config.interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let sweep_store = Arc::clone(&store);
        let sweep_config = config.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let evicted = sweep_store.sweep_all(Instant::now());
            let delay = next_delay(&sweep_store, &sweep_config, Instant::now());
            (evicted, delay)
        })
        .await;

        match outcome {
            Ok((evicted, next)) => {
                if evicted > 0 {
                    debug!(
                        evicted = evicted,
                        keys_remaining = store.len(),
                        "Expired keys cleaned up"
                    );
                }
                trace!(next_ms = next.as_millis() as u64, "Next expiry sweep scheduled");
                delay = next;
            }
            Err(e) => {
                warn!(error = %e, "Expiry sweep task failed");
                delay = config.interval;
            }
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(store: Arc<Store>) -> ExpirySweeper {
    ExpirySweeper::start(store, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn fill(store: &Store, count: usize, ttl: Duration) {
        let now = Instant::now();
        for i in 0..count {
            let key = Bytes::from(format!("key{}", i));
            store
                .shard_for(&key)
                .set_with_deadline(key.clone(), Bytes::from("value"), now + ttl);
        }
        let key = Bytes::from("persistent");
        store.shard_for(&key).set(key.clone(), Bytes::from("value"));
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        for mode in [ExpiryMode::Linear, ExpiryMode::Heap] {
            let store = Arc::new(Store::new(4, mode));
            fill(&store, 10, Duration::from_millis(50));
            assert_eq!(store.len(), 11);

            let config = ExpiryConfig {
                interval: Duration::from_millis(10),
                ..Default::default()
            };
            let _sweeper = ExpirySweeper::start(Arc::clone(&store), config);

            tokio::time::sleep(Duration::from_millis(300)).await;

            assert_eq!(store.len(), 1, "mode {}", mode);
        }
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let store = Arc::new(Store::new(4, ExpiryMode::Linear));

        let config = ExpiryConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store), config);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        fill(&store, 5, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nothing swept them, they are only gone once touched.
        assert_eq!(store.len(), 6);
        let key = Bytes::from("key0");
        assert_eq!(store.shard_for(&key).get(&key, Instant::now()), Ok(None));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_next_delay() {
        let config = ExpiryConfig {
            interval: Duration::from_millis(200),
            min_interval: Duration::from_millis(5),
        };
        let now = Instant::now();

        let linear = Store::new(2, ExpiryMode::Linear);
        assert_eq!(next_delay(&linear, &config, now), config.interval);

        let heap = Store::new(2, ExpiryMode::Heap);
        assert_eq!(next_delay(&heap, &config, now), config.interval);

        let key = Bytes::from("k");
        heap.shard_for(&key).set_with_deadline(
            key.clone(),
            Bytes::from("v"),
            now + Duration::from_millis(50),
        );
        assert_eq!(next_delay(&heap, &config, now), Duration::from_millis(50));

        // Overdue deadlines are clamped to the minimum interval.
        let later = now + Duration::from_secs(1);
        assert_eq!(next_delay(&heap, &config, later), config.min_interval);

        let far = Bytes::from("far");
        heap.shard_for(&key).del(&key, now);
        heap.shard_for(&far).set_with_deadline(
            far.clone(),
            Bytes::from("v"),
            now + Duration::from_secs(60),
        );
        assert_eq!(next_delay(&heap, &config, now), config.interval);
    }
}
