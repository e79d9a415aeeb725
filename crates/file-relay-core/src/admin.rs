//! Per-admin pending actions
//!
//! Some admin commands take their payload from the admin's next message
//! (`/broadcast`, `/shortlink` without arguments). The pending action is kept
//! per admin in an expiring cache and consumed by the first message that
//! follows, so nothing outlives a timeout or a restart.

use crate::model::{ShortlinkSettings, UserId};
use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

/// What the admin's next message will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Copy the next message to every known user
    Broadcast,
    /// Parse the next message as `<url> <api_key>`
    ShortlinkConfig,
}

/// Expiring admin id → pending action mapping
#[derive(Clone)]
pub struct AdminSessions {
    cache: Cache<UserId, PendingAction>,
}

impl AdminSessions {
    /// Creates a new `AdminSessions` store
    ///
    /// # Arguments
    ///
    /// * `ttl` - How long a pending action waits for its message
    /// * `max_capacity` - Maximum number of concurrent admin sessions
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Start waiting for `admin_id`'s next message, replacing any earlier action
    pub async fn begin(&self, admin_id: UserId, action: PendingAction) {
        debug!("Admin {admin_id} started {action:?}");
        self.cache.insert(admin_id, action).await;
    }

    /// Consume the pending action, if any
    pub async fn take(&self, admin_id: UserId) -> Option<PendingAction> {
        // `remove` hands back entries past their TTL, `get` does not
        let action = self.cache.get(&admin_id).await?;
        self.cache.invalidate(&admin_id).await;
        Some(action)
    }

    /// Drop the pending action. Returns `true` if there was one.
    pub async fn cancel(&self, admin_id: UserId) -> bool {
        self.take(admin_id).await.is_some()
    }
}

/// Parses `<url> <api_key>` as given to `/shortlink`
#[must_use]
pub fn parse_shortlink_args(text: &str) -> Option<ShortlinkSettings> {
    let mut parts = text.split_whitespace();
    let url = parts.next()?;
    let api_key = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(ShortlinkSettings {
        url: url.to_string(),
        api_key: api_key.to_string(),
    })
}
