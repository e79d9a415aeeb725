//! Inline button callbacks.

use crate::bot::resilient::send_html_resilient;
use crate::bot::views;
use crate::services::RelayServices;
use anyhow::Result;
use file_relay_core::config::VERIFICATION_VALIDITY_HOURS;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, warn};

/// Handles `check_time_<token>`, `premium_info` and `help` buttons.
///
/// The query is always answered so the client stops showing a spinner.
///
/// # Errors
///
/// Returns an error if Telegram rejects the answer.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    services: Arc<RelayServices>,
) -> Result<()> {
    let data = q.data.as_deref().unwrap_or_default();
    let user_id = q.from.id.0.cast_signed();

    if let Some(token) = data.strip_prefix(views::CHECK_TIME_PREFIX) {
        let text = match services.gate.time_remaining(user_id, token).await {
            Ok(status) => views::time_left_text(status),
            Err(e) => {
                error!("Failed to check token time for user {user_id}: {e}");
                "⚠️ Try again in a moment.".to_string()
            }
        };
        bot.answer_callback_query(q.id.clone())
            .text(text)
            .show_alert(true)
            .await?;
        return Ok(());
    }

    bot.answer_callback_query(q.id.clone()).await?;

    let text = match data {
        views::PREMIUM_INFO => {
            views::premium_text(services.settings.relay.premium_contact.as_deref())
        }
        views::HELP => views::help_text(
            services.gate.policy().free_limit,
            VERIFICATION_VALIDITY_HOURS,
        ),
        other => {
            warn!("Unknown callback data from user {user_id}: {other}");
            return Ok(());
        }
    };

    let chat_id = q
        .message
        .as_ref()
        .map_or(ChatId(user_id), |m| m.chat().id);
    send_html_resilient(&bot, chat_id, text, None).await?;
    Ok(())
}
