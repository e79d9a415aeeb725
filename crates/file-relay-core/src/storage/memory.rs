//! Process-local storage backend.
//!
//! Each collection sits behind its own lock; a write lock held for the whole
//! read-check-update gives the per-record atomicity the ledger relies on.

use super::{RelayStore, StorageError};
use crate::model::{
    Account, FileHandle, FileRecord, ShortlinkSettings, UserId, VerificationToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory storage, used for development and tests
#[derive(Default)]
pub struct InMemoryStorage {
    accounts: RwLock<HashMap<UserId, Account>>,
    files: RwLock<HashMap<FileHandle, FileRecord>>,
    tokens: RwLock<HashMap<String, VerificationToken>>,
    shortlink: RwLock<Option<ShortlinkSettings>>,
}

impl InMemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens, used or not
    pub async fn token_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}

#[async_trait]
impl RelayStore for InMemoryStorage {
    async fn ensure_account(
        &self,
        user_id: UserId,
        username: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Account, StorageError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id, username.clone(), now));
        if account.username.is_none() {
            account.username = username;
        }
        Ok(account.clone())
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, StorageError> {
        Ok(self.accounts.read().await.get(&user_id).cloned())
    }

    async fn consume_free_access(
        &self,
        user_id: UserId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StorageError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id, None, now));
        if account.files_accessed >= limit {
            return Ok(None);
        }
        account.files_accessed += 1;
        Ok(Some(account.files_accessed))
    }

    async fn reset_files_accessed(&self, user_id: UserId) -> Result<bool, StorageError> {
        let mut accounts = self.accounts.write().await;
        Ok(accounts
            .get_mut(&user_id)
            .map(|account| account.files_accessed = 0)
            .is_some())
    }

    async fn set_premium(
        &self,
        user_id: UserId,
        is_premium: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id, None, now))
            .is_premium = is_premium;
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StorageError> {
        let mut ids: Vec<UserId> = self.accounts.read().await.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn insert_file(&self, record: FileRecord) -> Result<(), StorageError> {
        let mut files = self.files.write().await;
        if files.contains_key(&record.handle) {
            return Err(StorageError::Conflict(format!("file {}", record.handle)));
        }
        files.insert(record.handle.clone(), record);
        Ok(())
    }

    async fn get_file(&self, handle: &FileHandle) -> Result<Option<FileRecord>, StorageError> {
        Ok(self.files.read().await.get(handle).cloned())
    }

    async fn insert_token(&self, token: VerificationToken) -> Result<(), StorageError> {
        let mut tokens = self.tokens.write().await;
        if tokens.contains_key(&token.token) {
            return Err(StorageError::Conflict("verification token".to_string()));
        }
        tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn find_token(
        &self,
        user_id: UserId,
        token: &str,
    ) -> Result<Option<VerificationToken>, StorageError> {
        Ok(self
            .tokens
            .read()
            .await
            .get(token)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn redeem_token(
        &self,
        user_id: UserId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FileHandle>, StorageError> {
        let mut tokens = self.tokens.write().await;
        Ok(tokens
            .get_mut(token)
            .filter(|t| t.user_id == user_id)
            .and_then(|t| t.redeem_at(now)))
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired_at(now));
        Ok(before - tokens.len())
    }

    async fn delete_user_tokens(&self, user_id: UserId) -> Result<usize, StorageError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.user_id != user_id);
        Ok(before - tokens.len())
    }

    async fn get_shortlink_settings(&self) -> Result<Option<ShortlinkSettings>, StorageError> {
        Ok(self.shortlink.read().await.clone())
    }

    async fn put_shortlink_settings(
        &self,
        settings: ShortlinkSettings,
    ) -> Result<(), StorageError> {
        *self.shortlink.write().await = Some(settings);
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), String> {
        Ok(())
    }
}
