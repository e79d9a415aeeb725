//! Shared services injected into every handler.

use crate::bot::DenialThrottle;
use crate::config::BotSettings;
use file_relay_core::admin::AdminSessions;
use file_relay_core::catalog::FileCatalog;
use file_relay_core::clock::Clock;
use file_relay_core::gate::AccessGate;
use file_relay_core::shortlink::Shortener;
use file_relay_core::storage::RelayStore;
use file_relay_core::sweeper::SweeperStats;
use std::sync::Arc;

/// Everything a handler may need, built once by the runner
pub struct RelayServices {
    /// Loaded settings
    pub settings: Arc<BotSettings>,
    /// Accounts, files, tokens and runtime settings
    pub store: Arc<dyn RelayStore>,
    /// Access decisions and verification
    pub gate: Arc<AccessGate>,
    /// Upload archiving and delivery
    pub catalog: Arc<FileCatalog>,
    /// Shortlink provider for sharing links
    pub shortener: Arc<dyn Shortener>,
    /// Pending admin actions
    pub admin_sessions: AdminSessions,
    /// Throttle for denial replies
    pub denial_throttle: DenialThrottle,
    /// Expiry sweeper counters
    pub sweeper_stats: Arc<SweeperStats>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl RelayServices {
    /// Whether `user_id` is a configured administrator
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.settings.relay.is_admin(user_id)
    }
}
