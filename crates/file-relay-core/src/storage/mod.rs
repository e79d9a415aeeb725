//! Storage layer for accounts, file records, verification tokens and settings
//!
//! Every mutation goes through a narrow per-record operation so that a backend
//! only has to provide single-record atomicity.

mod memory;
mod r2;

pub use memory::InMemoryStorage;
pub use r2::R2Storage;

use crate::model::{
    Account, FileHandle, FileRecord, ShortlinkSettings, UserId, VerificationToken,
};
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error retrieving object from S3
    #[error("S3 Get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error deleting object from S3
    #[error("S3 delete error: {0}")]
    S3Delete(String),
    /// Error listing objects in S3
    #[error("S3 list error: {0}")]
    S3List(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
    /// A record that must be unique already exists, or an update kept losing races
    #[error("Write conflict on {0}")]
    Conflict(String),
}

/// Interface for storage providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Fetch the account, creating it on first contact
    async fn ensure_account(
        &self,
        user_id: UserId,
        username: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Account, StorageError>;
    /// Fetch an account without creating it
    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, StorageError>;
    /// Atomically increments the free-access counter if it is below `limit`.
    ///
    /// Returns the new counter value, or `None` when the quota is exhausted.
    async fn consume_free_access(
        &self,
        user_id: UserId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StorageError>;
    /// Reset the free-access counter. Returns `false` if the account does not exist.
    async fn reset_files_accessed(&self, user_id: UserId) -> Result<bool, StorageError>;
    /// Grant or remove premium, creating the account if needed
    async fn set_premium(
        &self,
        user_id: UserId,
        is_premium: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// All known user IDs
    async fn list_user_ids(&self) -> Result<Vec<UserId>, StorageError>;

    /// Store a new file record. Fails with `Conflict` if the handle is taken.
    async fn insert_file(&self, record: FileRecord) -> Result<(), StorageError>;
    /// Look up a file record
    async fn get_file(&self, handle: &FileHandle) -> Result<Option<FileRecord>, StorageError>;

    /// Store a new token. Fails with `Conflict` if the token string is taken.
    async fn insert_token(&self, token: VerificationToken) -> Result<(), StorageError>;
    /// Read a token owned by `user_id` without modifying it
    async fn find_token(
        &self,
        user_id: UserId,
        token: &str,
    ) -> Result<Option<VerificationToken>, StorageError>;
    /// Atomically mark a redeemable token as used and return its file handle.
    ///
    /// Returns `None` for unknown, foreign, used or expired tokens.
    async fn redeem_token(
        &self,
        user_id: UserId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FileHandle>, StorageError>;
    /// Delete every token whose validity window has elapsed
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
    /// Delete every token owned by `user_id`
    async fn delete_user_tokens(&self, user_id: UserId) -> Result<usize, StorageError>;

    /// Runtime shortlink provider override
    async fn get_shortlink_settings(&self) -> Result<Option<ShortlinkSettings>, StorageError>;
    /// Replace the runtime shortlink provider override
    async fn put_shortlink_settings(
        &self,
        settings: ShortlinkSettings,
    ) -> Result<(), StorageError>;

    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// Prefix of all account objects
pub const ACCOUNTS_PREFIX: &str = "accounts/";
/// Prefix of all token objects
pub const TOKENS_PREFIX: &str = "tokens/";
/// Key of the shortlink settings record
pub const SHORTLINK_SETTINGS_KEY: &str = "settings/shortlink.json";

/// Returns the R2 key for an account
#[must_use]
pub fn account_key(user_id: UserId) -> String {
    format!("{ACCOUNTS_PREFIX}{user_id}.json")
}

/// Returns the R2 key for a file record
#[must_use]
pub fn file_key(handle: &FileHandle) -> String {
    format!("files/{handle}.json")
}

/// Returns the R2 prefix holding all tokens of a user
#[must_use]
pub fn user_tokens_prefix(user_id: UserId) -> String {
    format!("{TOKENS_PREFIX}{user_id}/")
}

/// Returns the R2 key for a verification token
#[must_use]
pub fn token_key(user_id: UserId, token: &str) -> String {
    format!("{}{token}.json", user_tokens_prefix(user_id))
}

/// Extracts the user ID from an account key
#[must_use]
pub fn user_id_from_account_key(key: &str) -> Option<UserId> {
    key.strip_prefix(ACCOUNTS_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(account_key(42), "accounts/42.json");
        assert_eq!(token_key(42, "abc"), "tokens/42/abc.json");
        assert!(token_key(42, "abc").starts_with(&user_tokens_prefix(42)));
        let handle = FileHandle::generate();
        assert_eq!(file_key(&handle), format!("files/{handle}.json"));
    }

    #[test]
    fn test_user_id_from_account_key() {
        assert_eq!(user_id_from_account_key("accounts/42.json"), Some(42));
        assert_eq!(user_id_from_account_key("accounts/-5.json"), Some(-5));
        assert_eq!(user_id_from_account_key("accounts/x.json"), None);
        assert_eq!(user_id_from_account_key("files/42.json"), None);
    }
}
