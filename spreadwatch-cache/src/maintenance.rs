//! Expired-entry sweeper.
//!
//! Expired entries are never served, but they stay in the tier maps until a
//! sweep removes them. [`spawn_cleanup_task`] runs that sweep on a fixed
//! period until the shutdown signal flips to `true`.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = spawn_cleanup_task(service.store().clone(), Duration::from_secs(60), shutdown_rx);
//!
//! // Later
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::store::CacheStore;

/// Counters kept by the sweeper over its lifetime.
#[derive(Debug, Default)]
pub struct CleanupMetrics {
    pub sweeps: AtomicU64,
    pub entries_removed: AtomicU64,
}

impl CleanupMetrics {
    pub fn snapshot(&self) -> CleanupSnapshot {
        CleanupSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSnapshot {
    pub sweeps: u64,
    pub entries_removed: u64,
}

/// Spawn the sweeper on the current runtime.
///
/// The first sweep happens immediately. A closed shutdown channel stops the
/// task as well.
pub fn spawn_cleanup_task(
    store: Arc<CacheStore>,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<Arc<CleanupMetrics>> {
    tokio::spawn(cleanup_task(store, period, shutdown_rx))
}

/// The sweeper loop itself, for callers that manage their own tasks.
pub async fn cleanup_task(
    store: Arc<CacheStore>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CleanupMetrics> {
    let metrics = Arc::new(CleanupMetrics::default());

    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(period_ms = period.as_millis() as u64, "Cache cleanup task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache cleanup task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let removed = store.cleanup_expired();
                metrics.sweeps.fetch_add(1, Ordering::Relaxed);
                metrics.entries_removed.fetch_add(removed as u64, Ordering::Relaxed);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        entries_removed = snapshot.entries_removed,
        "Cache cleanup task completed"
    );

    metrics
}
