//! Verification token ledger
//!
//! Issues single-use tokens bound to a (user, file) pair, redeems them at most
//! once inside their validity window, and purges them afterwards. Redemption is
//! deliberately opaque: wrong user, wrong token, reuse and expiry all look the
//! same to the caller. `peek_remaining` is the only diagnostic view.

use crate::clock::Clock;
use crate::config::TOKEN_LENGTH;
use crate::model::{FileHandle, UserId, VerificationToken};
use crate::storage::{RelayStore, StorageError};
use chrono::TimeDelta;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts at drawing an unused token string before giving up
const ISSUE_MAX_ATTEMPTS: usize = 3;

/// Result of a redemption attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// The token was valid and is now used
    Redeemed(FileHandle),
    /// Unknown, foreign, already used or expired
    NotFound,
}

/// Non-mutating view of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Still redeemable for this long
    Remaining(Duration),
    /// Unused but past its validity window
    Expired,
    /// Unknown, foreign or already used
    NotFound,
}

/// Issues, redeems and expires verification tokens
pub struct TokenLedger {
    store: Arc<dyn RelayStore>,
    clock: Arc<dyn Clock>,
    validity: TimeDelta,
}

impl TokenLedger {
    /// Create a ledger whose tokens stay valid for `validity`
    #[must_use]
    pub fn new(store: Arc<dyn RelayStore>, clock: Arc<dyn Clock>, validity: TimeDelta) -> Self {
        Self {
            store,
            clock,
            validity,
        }
    }

    /// Issue a fresh token bound to `user_id` and `file_handle`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the token cannot be persisted.
    pub async fn issue(
        &self,
        user_id: UserId,
        file_handle: &FileHandle,
    ) -> Result<VerificationToken, StorageError> {
        let mut last_conflict = None;
        for _ in 0..ISSUE_MAX_ATTEMPTS {
            let token = VerificationToken::new(
                generate_token(),
                user_id,
                file_handle.clone(),
                self.clock.now(),
                self.validity,
            );
            match self.store.insert_token(token.clone()).await {
                Ok(()) => {
                    info!(
                        "Issued verification token for user {user_id} (file {file_handle}, expires {})",
                        token.expires_at
                    );
                    return Ok(token);
                }
                Err(StorageError::Conflict(what)) => {
                    warn!("Token collision for user {user_id}, drawing a new one");
                    last_conflict = Some(what);
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict(
            last_conflict.unwrap_or_else(|| "verification token".to_string()),
        ))
    }

    /// Redeem `token` on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn redeem(&self, user_id: UserId, token: &str) -> Result<Redemption, StorageError> {
        if !is_well_formed_token(token) {
            debug!("Rejected malformed token from user {user_id}");
            return Ok(Redemption::NotFound);
        }
        let redeemed = self
            .store
            .redeem_token(user_id, token, self.clock.now())
            .await?;
        Ok(match redeemed {
            Some(handle) => {
                info!("User {user_id} redeemed a verification token for file {handle}");
                Redemption::Redeemed(handle)
            }
            None => Redemption::NotFound,
        })
    }

    /// How long `token` stays redeemable, without consuming it.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn peek_remaining(
        &self,
        user_id: UserId,
        token: &str,
    ) -> Result<TokenStatus, StorageError> {
        if !is_well_formed_token(token) {
            return Ok(TokenStatus::NotFound);
        }
        let status = match self.store.find_token(user_id, token).await? {
            Some(record) if !record.used => record
                .remaining_at(self.clock.now())
                .map_or(TokenStatus::Expired, TokenStatus::Remaining),
            _ => TokenStatus::NotFound,
        };
        Ok(status)
    }

    /// Delete every token past its validity window, used or not.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        self.store.delete_expired_tokens(self.clock.now()).await
    }

    /// Delete every token owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store is unavailable.
    pub async fn purge_all_for_user(&self, user_id: UserId) -> Result<usize, StorageError> {
        let removed = self.store.delete_user_tokens(user_id).await?;
        debug!("Purged {removed} tokens of user {user_id}");
        Ok(removed)
    }
}

/// Draw a random alphanumeric token of `TOKEN_LENGTH` characters
#[must_use]
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Tokens are exactly `TOKEN_LENGTH` ASCII alphanumerics; anything else is never stored.
#[must_use]
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.chars().all(|c| c.is_ascii_alphanumeric())
}
