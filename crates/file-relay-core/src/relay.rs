//! Content relay capability.
//!
//! The bot never stores file bytes: uploads are copied into a storage chat and
//! later copied from there to whoever redeems the link.

use crate::model::StorageLocation;
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a content relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// The source message is gone or cannot be copied
    #[error("Source content unavailable: {0}")]
    Unavailable(String),
    /// Transport failure (network, rate limit, ...)
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Copies stored content between chats
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentRelay: Send + Sync {
    /// Copy the message at `source` into `destination_chat`, returning the new message ID
    async fn relay(
        &self,
        source: StorageLocation,
        destination_chat: i64,
    ) -> Result<i32, RelayError>;
}
