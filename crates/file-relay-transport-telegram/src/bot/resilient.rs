//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Transient network failures are retried with exponential backoff and jitter.
//!
//! # Usage
//!
//! ```ignore
//! use file_relay_transport_telegram::bot::resilient::send_html_resilient;
//!
//! let msg = send_html_resilient(&bot, chat_id, "<b>Hello!</b>", None).await?;
//! ```

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use anyhow::Result;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardMarkup, Message, MessageId, ParseMode};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, warn};

/// Retries an async Telegram operation with exponential backoff and jitter.
///
/// # Errors
///
/// Returns the last error once all retries are exhausted.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} retries: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

/// Send an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let text = text.into();
    retry_telegram_operation(|| async {
        let mut req = bot
            .send_message(chat_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard.clone() {
            req = req.reply_markup(markup);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit an HTML message, ignoring "message is not modified".
///
/// Returns `false` if the edit failed after retries.
pub async fn edit_html_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> bool {
    let result = retry_telegram_operation(|| async {
        match bot
            .edit_message_text(chat_id, msg_id, text.to_string())
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("message is not modified") => Ok(false),
            Err(e) => Err(anyhow::anyhow!("Telegram edit error: {e}")),
        }
    })
    .await;

    match result {
        Ok(true) => true,
        Ok(false) => {
            debug!("Message update skipped: message is not modified");
            true
        }
        Err(e) => {
            warn!("Failed to edit message after retries: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() -> Result<()> {
        let attempts = AtomicUsize::new(0);
        let value = retry_telegram_operation(|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow::anyhow!("connection reset"))
            } else {
                Ok(7)
            }
        })
        .await?;
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_telegram_operation(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("still down"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), TELEGRAM_API_MAX_RETRIES + 1);
    }
}
