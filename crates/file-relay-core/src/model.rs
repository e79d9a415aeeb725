//! Domain records persisted by the stores.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Telegram user identifier
pub type UserId = i64;

/// Longest accepted file handle
const MAX_HANDLE_LEN: usize = 64;

/// Opaque identifier of an archived file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHandle(String);

impl FileHandle {
    /// Generates a fresh random handle
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps a raw handle, rejecting anything that is not a short alphanumeric string.
    ///
    /// Handles end up in storage keys, so separators and dots are never accepted.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_HANDLE_LEN
            && raw.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| Self(raw.to_string()))
    }

    /// Borrow the handle as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-user quota and premium state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Owner of the account
    pub user_id: UserId,
    /// Telegram username at first contact
    #[serde(default)]
    pub username: Option<String>,
    /// Free redemptions since the last verification
    #[serde(default)]
    pub files_accessed: u32,
    /// Premium accounts bypass quota and verification
    #[serde(default)]
    pub is_premium: bool,
    /// First interaction
    pub joined_at: DateTime<Utc>,
}

impl Account {
    /// A fresh, non-premium account with an empty counter
    #[must_use]
    pub fn new(user_id: UserId, username: Option<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            username,
            files_accessed: 0,
            is_premium: false,
            joined_at,
        }
    }
}

/// Kind of content an upload carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Generic document
    Document,
    /// Video
    Video,
    /// Audio track
    Audio,
    /// Photo
    Photo,
}

impl ContentKind {
    /// Lowercase tag
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Photo => "photo",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the content relay can find a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    /// Chat holding the message
    pub chat_id: i64,
    /// Message inside that chat
    pub message_id: i32,
}

/// Archived upload. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Identity
    pub handle: FileHandle,
    /// Display name
    pub file_name: String,
    /// Size in bytes
    pub file_size: u64,
    /// Content kind
    pub kind: ContentKind,
    /// Archived copy in the storage channel
    pub location: StorageLocation,
    /// Uploader
    pub uploaded_by: UserId,
    /// Upload time
    pub uploaded_at: DateTime<Utc>,
}

/// Single-use verification token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationToken {
    /// Random token string
    pub token: String,
    /// Only this user may redeem the token
    pub user_id: UserId,
    /// File delivered on redemption
    pub file_handle: FileHandle,
    /// Issue time
    pub created_at: DateTime<Utc>,
    /// End of the validity window (exclusive)
    pub expires_at: DateTime<Utc>,
    /// Set once, on redemption
    #[serde(default)]
    pub used: bool,
    /// Redemption time
    #[serde(default)]
    pub used_at: Option<DateTime<Utc>>,
}

impl VerificationToken {
    /// A new unused token valid for `validity` after `created_at`
    #[must_use]
    pub fn new(
        token: String,
        user_id: UserId,
        file_handle: FileHandle,
        created_at: DateTime<Utc>,
        validity: TimeDelta,
    ) -> Self {
        Self {
            token,
            user_id,
            file_handle,
            created_at,
            expires_at: created_at + validity,
            used: false,
            used_at: None,
        }
    }

    /// Unused and inside its validity window
    #[must_use]
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }

    /// The validity window has elapsed
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, `None` once expired
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now)
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }

    /// Redeems the token if it is still redeemable, returning the bound file.
    pub fn redeem_at(&mut self, now: DateTime<Utc>) -> Option<FileHandle> {
        if !self.is_redeemable_at(now) {
            return None;
        }
        self.used = true;
        self.used_at = Some(now);
        Some(self.file_handle.clone())
    }
}

/// Shortlink provider endpoint and credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortlinkSettings {
    /// Provider base URL, scheme optional
    pub url: String,
    /// Provider API key
    pub api_key: String,
}

impl ShortlinkSettings {
    /// Provider API endpoint (`<base>/api`), with `https://` added when the scheme is missing
    #[must_use]
    pub fn api_endpoint(&self) -> String {
        let base = self.url.trim().trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{base}/api")
        } else {
            format!("https://{base}/api")
        }
    }
}
