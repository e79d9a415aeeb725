//! Rate limit for "Access denied" replies.
//!
//! Each user owns one reply slot per cooldown window. Claiming the slot is a
//! single atomic cache insert, so concurrent admin-command attempts from the
//! same user produce one reply. A reply that fails to send gives the slot back.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Silenced attempts are logged once per this many
const SILENCED_LOG_EVERY: u64 = 100;

/// Per-user reply slots that refill after the cooldown
#[derive(Clone)]
pub struct DenialThrottle {
    slots: Cache<i64, ()>,
    cooldown: Duration,
    silenced: Arc<AtomicU64>,
}

impl DenialThrottle {
    /// Throttle allowing one denial per user every `cooldown`, tracking at most
    /// `max_users` users at a time.
    ///
    /// ```
    /// use file_relay_transport_telegram::bot::DenialThrottle;
    /// use std::time::Duration;
    ///
    /// let throttle = DenialThrottle::new(Duration::from_secs(1200), 10_000);
    /// assert_eq!(throttle.silenced_count(), 0);
    /// ```
    #[must_use]
    pub fn new(cooldown: Duration, max_users: u64) -> Self {
        Self {
            slots: Cache::builder()
                .max_capacity(max_users)
                .time_to_live(cooldown)
                .build(),
            cooldown,
            silenced: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Claims `user_id`'s reply slot. `false` means a denial already went out
    /// in this window and the attempt is only counted.
    pub async fn try_claim(&self, user_id: i64) -> bool {
        if self.slots.entry(user_id).or_insert(()).await.is_fresh() {
            return true;
        }
        let silenced = self.silenced.fetch_add(1, Ordering::Relaxed) + 1;
        if silenced % SILENCED_LOG_EVERY == 0 {
            debug!("{silenced} denied attempts silenced so far (latest from {user_id})");
        }
        false
    }

    /// Returns a claimed slot whose reply could not be delivered
    pub async fn release(&self, user_id: i64) {
        self.slots.invalidate(&user_id).await;
    }

    /// Attempts silenced since start
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced.load(Ordering::Relaxed)
    }

    /// Length of a reply window
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
