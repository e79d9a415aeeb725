//! Access gate
//!
//! The single decision point for "may this user receive this file right now":
//! premium accounts always pass, free accounts pass while they have quota left,
//! everyone else gets a verification challenge. Redeeming a challenge resets
//! the quota and invalidates every other outstanding token of the user.

use crate::clock::Clock;
use crate::config::{FREE_LIMIT, SHORTLINK_TIMEOUT_SECS, VERIFICATION_VALIDITY_HOURS};
use crate::ledger::{Redemption, TokenLedger, TokenStatus};
use crate::link::LinkBuilder;
use crate::model::{FileHandle, FileRecord, UserId};
use crate::shortlink::{shorten_or_fallback, Shortener};
use crate::storage::{RelayStore, StorageError};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed gating parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Free redemptions between verifications
    pub free_limit: u32,
    /// Validity window of a verification token
    pub validity: TimeDelta,
    /// Upper bound on the shortlink call
    pub shortlink_timeout: Duration,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            free_limit: FREE_LIMIT,
            validity: TimeDelta::hours(VERIFICATION_VALIDITY_HOURS),
            shortlink_timeout: Duration::from_secs(SHORTLINK_TIMEOUT_SECS),
        }
    }
}

/// Why a delivery was allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGrant {
    /// Premium bypass
    Premium,
    /// Free quota; `used` counts this delivery
    FreeQuota {
        /// Counter after this delivery
        used: u32,
        /// Configured limit
        limit: u32,
    },
}

/// A verification challenge presented once quota is exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Token the user has to redeem
    pub token: String,
    /// Link to show (shortened when the provider answered)
    pub link: String,
    /// Unshortened deep link
    pub direct_link: String,
    /// End of the token's validity window
    pub expires_at: DateTime<Utc>,
    /// Quota restored by verifying
    pub free_limit: u32,
}

impl Challenge {
    /// Whether the shortlink provider produced the link
    #[must_use]
    pub fn is_shortened(&self) -> bool {
        self.link != self.direct_link
    }
}

/// Outcome of a file request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Deliver now
    Deliver {
        /// File to relay
        file: FileRecord,
        /// Reason
        grant: AccessGrant,
    },
    /// Quota exhausted, verification required
    Challenge(Challenge),
    /// Unknown file handle
    FileNotFound,
}

/// Outcome of presenting a verification token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Token redeemed, quota reset, file ready for delivery
    Delivered(FileRecord),
    /// Token redeemed and quota reset, but the bound file no longer exists
    VerifiedFileMissing(FileHandle),
    /// Unknown, foreign, reused or expired token
    Failed,
}

/// Combines accounts, files and the token ledger into access decisions
pub struct AccessGate {
    store: Arc<dyn RelayStore>,
    ledger: Arc<TokenLedger>,
    shortener: Arc<dyn Shortener>,
    links: LinkBuilder,
    clock: Arc<dyn Clock>,
    policy: AccessPolicy,
}

impl AccessGate {
    /// Create a gate
    #[must_use]
    pub fn new(
        store: Arc<dyn RelayStore>,
        ledger: Arc<TokenLedger>,
        shortener: Arc<dyn Shortener>,
        links: LinkBuilder,
        clock: Arc<dyn Clock>,
        policy: AccessPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            shortener,
            links,
            clock,
            policy,
        }
    }

    /// Gating parameters in effect
    #[must_use]
    pub const fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Deep-link builder shared with the transport
    #[must_use]
    pub const fn links(&self) -> &LinkBuilder {
        &self.links
    }

    /// Decide whether `user_id` may receive `handle` right now.
    ///
    /// Consumes one unit of free quota when delivering to a non-premium user.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn request_file(
        &self,
        user_id: UserId,
        username: Option<String>,
        handle: &FileHandle,
    ) -> Result<AccessDecision, StorageError> {
        let Some(file) = self.store.get_file(handle).await? else {
            info!("User {user_id} requested unknown file {handle}");
            return Ok(AccessDecision::FileNotFound);
        };

        let now = self.clock.now();
        let account = self.store.ensure_account(user_id, username, now).await?;
        if account.is_premium {
            info!("Premium user {user_id} gets file {handle}");
            return Ok(AccessDecision::Deliver {
                file,
                grant: AccessGrant::Premium,
            });
        }

        let limit = self.policy.free_limit;
        if let Some(used) = self.store.consume_free_access(user_id, limit, now).await? {
            info!("User {user_id} gets file {handle} on free quota ({used}/{limit})");
            return Ok(AccessDecision::Deliver {
                file,
                grant: AccessGrant::FreeQuota { used, limit },
            });
        }

        let challenge = self.challenge(user_id, handle).await?;
        Ok(AccessDecision::Challenge(challenge))
    }

    async fn challenge(
        &self,
        user_id: UserId,
        handle: &FileHandle,
    ) -> Result<Challenge, StorageError> {
        let token = self.ledger.issue(user_id, handle).await?;
        let direct_link = self.links.verification_link(&token.token);
        let link = shorten_or_fallback(
            self.shortener.as_ref(),
            &direct_link,
            self.policy.shortlink_timeout,
        )
        .await;
        info!("User {user_id} exhausted the free quota, challenge issued for file {handle}");
        Ok(Challenge {
            token: token.token,
            link,
            direct_link,
            expires_at: token.expires_at,
            free_limit: self.policy.free_limit,
        })
    }

    /// Redeem a verification token presented by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn redeem_verification(
        &self,
        user_id: UserId,
        token: &str,
    ) -> Result<VerificationOutcome, StorageError> {
        let Redemption::Redeemed(handle) = self.ledger.redeem(user_id, token).await? else {
            info!("Verification failed for user {user_id}");
            return Ok(VerificationOutcome::Failed);
        };

        self.reset_user(user_id).await?;

        match self.store.get_file(&handle).await? {
            Some(file) => {
                info!("User {user_id} verified, delivering file {handle}");
                Ok(VerificationOutcome::Delivered(file))
            }
            None => {
                warn!("User {user_id} verified but file {handle} is gone");
                Ok(VerificationOutcome::VerifiedFileMissing(handle))
            }
        }
    }

    /// Time left on a challenge token, without consuming it.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn time_remaining(
        &self,
        user_id: UserId,
        token: &str,
    ) -> Result<TokenStatus, StorageError> {
        self.ledger.peek_remaining(user_id, token).await
    }

    /// Reset the free quota and drop every outstanding token of `user_id`.
    ///
    /// Returns `false` if the user has never interacted with the bot.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn reset_user(&self, user_id: UserId) -> Result<bool, StorageError> {
        let existed = self.store.reset_files_accessed(user_id).await?;
        let purged = self.ledger.purge_all_for_user(user_id).await?;
        info!("Reset quota of user {user_id} ({purged} tokens dropped)");
        Ok(existed)
    }

    /// Grant or remove premium status.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn set_premium(&self, user_id: UserId, is_premium: bool) -> Result<(), StorageError> {
        self.store
            .set_premium(user_id, is_premium, self.clock.now())
            .await?;
        info!("Premium for user {user_id} set to {is_premium}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{ContentKind, StorageLocation};
    use crate::storage::{InMemoryStorage, MockRelayStore};
    use crate::testing::{mock_shortener_failing, mock_shortener_fixed, mock_store_unavailable};

    struct Fixture {
        gate: AccessGate,
        store: Arc<InMemoryStorage>,
        clock: Arc<ManualClock>,
        file: FileRecord,
    }

    fn record(clock: &ManualClock) -> FileRecord {
        FileRecord {
            handle: FileHandle::generate(),
            file_name: "report.pdf".to_string(),
            file_size: 2048,
            kind: ContentKind::Document,
            location: StorageLocation {
                chat_id: -100,
                message_id: 5,
            },
            uploaded_by: 1,
            uploaded_at: clock.now(),
        }
    }

    async fn fixture(shortener: Arc<dyn Shortener>) -> Result<Fixture, StorageError> {
        let store = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(TokenLedger::new(
            store.clone(),
            clock.clone(),
            TimeDelta::hours(6),
        ));
        let file = record(&clock);
        store.insert_file(file.clone()).await?;
        let gate = AccessGate::new(
            store.clone(),
            ledger,
            shortener,
            LinkBuilder::new("RelayBot"),
            clock.clone(),
            AccessPolicy::default(),
        );
        Ok(Fixture {
            gate,
            store,
            clock,
            file,
        })
    }

    fn expect_challenge(decision: AccessDecision) -> Challenge {
        match decision {
            AccessDecision::Challenge(challenge) => challenge,
            other => panic!("expected a challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_free_quota_then_challenge() -> Result<(), StorageError> {
        let fx = fixture(Arc::new(mock_shortener_fixed("https://aro.li/v"))).await?;

        for expected in 1..=3 {
            let decision = fx.gate.request_file(7, None, &fx.file.handle).await?;
            assert_eq!(
                decision,
                AccessDecision::Deliver {
                    file: fx.file.clone(),
                    grant: AccessGrant::FreeQuota {
                        used: expected,
                        limit: 3
                    },
                }
            );
        }

        let challenge = expect_challenge(fx.gate.request_file(7, None, &fx.file.handle).await?);
        assert_eq!(challenge.link, "https://aro.li/v");
        assert_eq!(
            challenge.direct_link,
            format!("https://t.me/RelayBot?start=verify_{}", challenge.token)
        );
        assert!(challenge.is_shortened());
        assert_eq!(challenge.expires_at, fx.clock.now() + TimeDelta::hours(6));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_file_consumes_nothing() -> Result<(), StorageError> {
        let fx = fixture(Arc::new(mock_shortener_failing())).await?;
        let decision = fx
            .gate
            .request_file(7, None, &FileHandle::generate())
            .await?;
        assert_eq!(decision, AccessDecision::FileNotFound);
        assert_eq!(fx.store.get_account(7).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_request_registers_new_user() -> Result<(), StorageError> {
        let fx = fixture(Arc::new(mock_shortener_failing())).await?;
        fx.gate
            .request_file(7, Some("alice".to_string()), &fx.file.handle)
            .await?;

        let account = fx.store.get_account(7).await?;
        assert_eq!(
            account.map(|a| (a.username, a.files_accessed)),
            Some((Some("alice".to_string()), 1))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_premium_bypasses_quota() -> Result<(), StorageError> {
        let fx = fixture(Arc::new(mock_shortener_failing())).await?;
        fx.gate.set_premium(7, true).await?;

        for _ in 0..10 {
            let decision = fx.gate.request_file(7, None, &fx.file.handle).await?;
            assert!(matches!(
                decision,
                AccessDecision::Deliver {
                    grant: AccessGrant::Premium,
                    ..
                }
            ));
        }
        let account = fx.store.get_account(7).await?;
        assert_eq!(account.map(|a| a.files_accessed), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_verification_resets_quota_and_kills_other_tokens() -> Result<(), StorageError> {
        let fx = fixture(Arc::new(mock_shortener_failing())).await?;
        for _ in 0..3 {
            fx.gate.request_file(7, None, &fx.file.handle).await?;
        }
        let first = expect_challenge(fx.gate.request_file(7, None, &fx.file.handle).await?);
        let second = expect_challenge(fx.gate.request_file(7, None, &fx.file.handle).await?);
        assert!(!first.is_shortened());

        let outcome = fx.gate.redeem_verification(7, &second.token).await?;
        assert_eq!(outcome, VerificationOutcome::Delivered(fx.file.clone()));

        let account = fx.store.get_account(7).await?;
        assert_eq!(account.map(|a| a.files_accessed), Some(0));
        assert_eq!(
            fx.gate.redeem_verification(7, &first.token).await?,
            VerificationOutcome::Failed
        );
        assert_eq!(
            fx.gate.redeem_verification(7, &second.token).await?,
            VerificationOutcome::Failed
        );
        assert_eq!(fx.store.token_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_foreign_token_fails() -> Result<(), StorageError> {
        let fx = fixture(Arc::new(mock_shortener_failing())).await?;
        for _ in 0..3 {
            fx.gate.request_file(7, None, &fx.file.handle).await?;
        }
        let challenge = expect_challenge(fx.gate.request_file(7, None, &fx.file.handle).await?);

        assert_eq!(
            fx.gate.redeem_verification(8, &challenge.token).await?,
            VerificationOutcome::Failed
        );
        assert_eq!(
            fx.gate.time_remaining(8, &challenge.token).await?,
            TokenStatus::NotFound
        );
        assert!(matches!(
            fx.gate.time_remaining(7, &challenge.token).await?,
            TokenStatus::Remaining(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_user_unknown_account() -> Result<(), StorageError> {
        let fx = fixture(Arc::new(mock_shortener_failing())).await?;
        assert!(!fx.gate.reset_user(404).await?);
        assert_eq!(fx.store.get_account(404).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_outage_surfaces_as_error() {
        let store: Arc<dyn RelayStore> = Arc::new(mock_store_unavailable());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(TokenLedger::new(
            store.clone(),
            clock.clone(),
            TimeDelta::hours(6),
        ));
        let gate = AccessGate::new(
            store,
            ledger,
            Arc::new(mock_shortener_failing()),
            LinkBuilder::new("RelayBot"),
            clock,
            AccessPolicy::default(),
        );

        assert!(gate
            .request_file(7, None, &FileHandle::generate())
            .await
            .is_err());
        assert!(gate
            .redeem_verification(7, &"a".repeat(32))
            .await
            .is_err());
        assert!(gate.time_remaining(7, &"a".repeat(32)).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_after_verification() -> Result<(), StorageError> {
        let handle = FileHandle::generate();
        let bound = handle.clone();
        let mut store = MockRelayStore::new();
        store
            .expect_redeem_token()
            .returning(move |_, _, _| Ok(Some(bound.clone())));
        store.expect_reset_files_accessed().returning(|_| Ok(true));
        store.expect_delete_user_tokens().returning(|_| Ok(1));
        store.expect_get_file().returning(|_| Ok(None));

        let store: Arc<dyn RelayStore> = Arc::new(store);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(TokenLedger::new(
            store.clone(),
            clock.clone(),
            TimeDelta::hours(6),
        ));
        let gate = AccessGate::new(
            store,
            ledger,
            Arc::new(mock_shortener_failing()),
            LinkBuilder::new("RelayBot"),
            clock,
            AccessPolicy::default(),
        );

        assert_eq!(
            gate.redeem_verification(7, &"b".repeat(32)).await?,
            VerificationOutcome::VerifiedFileMissing(handle)
        );
        Ok(())
    }
}
