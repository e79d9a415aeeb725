//! Background purge of expired verification tokens
//!
//! Redemption re-checks expiry on its own, so the sweeper only reclaims
//! storage. A failed sweep is logged and counted; the loop keeps its schedule.

use crate::ledger::TokenLedger;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Counters shared between the sweeper task and observers
#[derive(Debug, Default)]
pub struct SweeperStats {
    sweeps: AtomicU64,
    failures: AtomicU64,
    removed: AtomicU64,
    last_run_millis: AtomicI64,
}

/// Point-in-time copy of [`SweeperStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperSnapshot {
    /// Completed sweeps
    pub sweeps: u64,
    /// Failed sweeps
    pub failures: u64,
    /// Tokens removed since start
    pub removed: u64,
    /// Last sweep attempt
    pub last_run: Option<DateTime<Utc>>,
}

impl SweeperStats {
    /// Read all counters
    #[must_use]
    pub fn snapshot(&self) -> SweeperSnapshot {
        let last_run_millis = self.last_run_millis.load(Ordering::Relaxed);
        SweeperSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            last_run: (last_run_millis != 0)
                .then(|| DateTime::from_timestamp_millis(last_run_millis))
                .flatten(),
        }
    }

    fn record_attempt(&self) {
        self.last_run_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

/// Periodically calls [`TokenLedger::purge_expired`]
pub struct ExpirySweeper {
    ledger: Arc<TokenLedger>,
    interval: Duration,
    stats: Arc<SweeperStats>,
}

impl ExpirySweeper {
    /// Sweeper running every `interval`
    #[must_use]
    pub fn new(ledger: Arc<TokenLedger>, interval: Duration) -> Self {
        Self {
            ledger,
            interval,
            stats: Arc::new(SweeperStats::default()),
        }
    }

    /// Shared statistics handle
    #[must_use]
    pub fn stats(&self) -> Arc<SweeperStats> {
        Arc::clone(&self.stats)
    }

    /// Run a single sweep. Returns the number of tokens removed, or `None` on failure.
    pub async fn sweep_once(&self) -> Option<usize> {
        self.stats.record_attempt();
        match self.ledger.purge_expired().await {
            Ok(removed) => {
                self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .removed
                    .fetch_add(removed as u64, Ordering::Relaxed);
                if removed > 0 {
                    info!("Expiry sweep removed {removed} tokens");
                } else {
                    debug!("Expiry sweep found nothing to remove");
                }
                Some(removed)
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                error!("Expiry sweep failed: {e}");
                None
            }
        }
    }

    /// Sweep on every tick until `cancel` fires. The first sweep runs immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Starting expiry sweeper (every {}s)",
            self.interval.as_secs()
        );
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Expiry sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Spawn [`Self::run`] on the runtime; the caller owns the handle.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::FileHandle;
    use crate::storage::{InMemoryStorage, RelayStore};
    use crate::testing::mock_store_unavailable;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_sweep_removes_expired_tokens() -> Result<(), crate::storage::StorageError> {
        let store = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(TokenLedger::new(
            store.clone(),
            clock.clone(),
            TimeDelta::hours(6),
        ));
        ledger.issue(1, &FileHandle::generate()).await?;
        ledger.issue(2, &FileHandle::generate()).await?;

        let sweeper = ExpirySweeper::new(ledger.clone(), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once().await, Some(0));

        clock.advance(TimeDelta::hours(7));
        ledger.issue(3, &FileHandle::generate()).await?;
        assert_eq!(sweeper.sweep_once().await, Some(2));
        assert_eq!(store.token_count().await, 1);

        let stats = sweeper.stats().snapshot();
        assert_eq!(stats.sweeps, 2);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.failures, 0);
        assert!(stats.last_run.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let store: Arc<dyn RelayStore> = Arc::new(mock_store_unavailable());
        let ledger = Arc::new(TokenLedger::new(
            store,
            Arc::new(ManualClock::new(Utc::now())),
            TimeDelta::hours(6),
        ));
        let sweeper = ExpirySweeper::new(ledger, Duration::from_millis(10));
        let stats = sweeper.stats();
        let cancel = CancellationToken::new();
        let handle = sweeper.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        assert!(handle.await.is_ok());

        let snapshot = stats.snapshot();
        assert!(snapshot.failures >= 2);
        assert_eq!(snapshot.sweeps, 0);
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() {
        let ledger = Arc::new(TokenLedger::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(ManualClock::new(Utc::now())),
            TimeDelta::hours(6),
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sweeper = ExpirySweeper::new(ledger, Duration::from_secs(3600));
        let stats = sweeper.stats();
        sweeper.run(cancel).await;
        assert_eq!(stats.snapshot().sweeps, 0);
    }
}
