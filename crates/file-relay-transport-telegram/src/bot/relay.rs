//! Telegram content relay: copies messages between chats without re-uploading.

use crate::bot::resilient::retry_telegram_operation;
use async_trait::async_trait;
use file_relay_core::model::StorageLocation;
use file_relay_core::relay::{ContentRelay, RelayError};
use teloxide::prelude::*;
use teloxide::types::MessageId;
use teloxide::{ApiError, RequestError};

enum CopyOutcome {
    Copied(MessageId),
    Gone(String),
}

/// [`ContentRelay`] backed by `copyMessage`
pub struct TelegramRelay {
    bot: Bot,
}

impl TelegramRelay {
    /// Relay using `bot`
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ContentRelay for TelegramRelay {
    async fn relay(
        &self,
        source: StorageLocation,
        destination_chat: i64,
    ) -> Result<i32, RelayError> {
        let outcome = retry_telegram_operation(|| async {
            match self
                .bot
                .copy_message(
                    ChatId(destination_chat),
                    ChatId(source.chat_id),
                    MessageId(source.message_id),
                )
                .await
            {
                Ok(id) => Ok(CopyOutcome::Copied(id)),
                // Permanent: the stored copy is gone or the bot lost access to it
                Err(RequestError::Api(
                    e @ (ApiError::MessageToCopyNotFound
                    | ApiError::ChatNotFound
                    | ApiError::BotBlocked),
                )) => Ok(CopyOutcome::Gone(e.to_string())),
                Err(e) => Err(anyhow::anyhow!("copyMessage failed: {e}")),
            }
        })
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))?;

        match outcome {
            CopyOutcome::Copied(id) => Ok(id.0),
            CopyOutcome::Gone(reason) => Err(RelayError::Unavailable(reason)),
        }
    }
}
