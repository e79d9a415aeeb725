//! Administrator commands: stats, quota reset, premium, broadcast, shortlink provider.

use crate::bot::handlers::{get_user_id_safe, get_user_name};
use crate::bot::resilient::{edit_html_safe_resilient, send_html_resilient};
use crate::bot::views;
use crate::config::{BROADCAST_PAUSE_MS, BROADCAST_PROGRESS_EVERY};
use crate::services::RelayServices;
use anyhow::Result;
use file_relay_core::admin::{parse_shortlink_args, PendingAction};
use file_relay_core::model::{ShortlinkSettings, UserId};
use html_escape::encode_text;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tracing::{error, info, warn};

/// Premium command argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumAction {
    /// Grant premium
    Grant,
    /// Remove premium
    Remove,
}

/// Parses `<user_id> [grant|remove]`; the action defaults to grant
#[must_use]
pub fn parse_premium_args(args: &str) -> Option<(UserId, PremiumAction)> {
    let mut parts = args.split_whitespace();
    let user_id = parts.next()?.parse().ok()?;
    let action = match parts.next().map(str::to_lowercase).as_deref() {
        None | Some("grant") => PremiumAction::Grant,
        Some("remove") => PremiumAction::Remove,
        Some(_) => return None,
    };
    parts.next().is_none().then_some((user_id, action))
}

/// Parses `<user_id>`
#[must_use]
pub fn parse_user_id_arg(args: &str) -> Option<UserId> {
    let mut parts = args.split_whitespace();
    let user_id = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some(user_id)
}

/// Masks an API key for display, keeping the last four characters
#[must_use]
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// Checks admin rights; non-admins get a throttled denial.
///
/// Returns `true` if the sender is an administrator.
pub async fn ensure_admin(bot: &Bot, msg: &Message, services: &RelayServices) -> bool {
    let user_id = get_user_id_safe(msg);
    if services.is_admin(user_id) {
        return true;
    }

    if !services.denial_throttle.try_claim(user_id).await {
        return false;
    }
    info!(
        "⛔️ Admin command from non-admin user {user_id} ({}). Sending denial message.",
        get_user_name(msg)
    );
    if let Err(e) = bot.send_message(msg.chat.id, views::ACCESS_DENIED).await {
        error!("Failed to send access denied message to {user_id}: {e}");
        services.denial_throttle.release(user_id).await;
    }
    false
}

/// Stats handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn stats(bot: Bot, msg: Message, services: Arc<RelayServices>) -> Result<()> {
    if !ensure_admin(&bot, &msg, &services).await {
        return Ok(());
    }

    let users = match services.store.list_user_ids().await {
        Ok(ids) => ids.len(),
        Err(e) => {
            error!("Failed to count users: {e}");
            send_html_resilient(&bot, msg.chat.id, views::TEMPORARY_FAILURE, None).await?;
            return Ok(());
        }
    };
    let throttle = &services.denial_throttle;
    let text = views::stats_text(
        users,
        services.sweeper_stats.snapshot(),
        throttle.silenced_count(),
        throttle.cooldown().as_secs() / 60,
    );
    send_html_resilient(&bot, msg.chat.id, text, None).await?;
    Ok(())
}

/// Reset handler: clears a user's quota and drops their tokens
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn reset(bot: Bot, msg: Message, args: String, services: Arc<RelayServices>) -> Result<()> {
    if !ensure_admin(&bot, &msg, &services).await {
        return Ok(());
    }

    let Some(target) = parse_user_id_arg(&args) else {
        send_html_resilient(
            &bot,
            msg.chat.id,
            "🔄 <b>Reset User Verification</b>\n\nUsage: <code>/reset &lt;user_id&gt;</code>",
            None,
        )
        .await?;
        return Ok(());
    };

    let reply = match services.gate.reset_user(target).await {
        Ok(true) => format!("✅ Quota and verification reset for user <code>{target}</code>"),
        Ok(false) => format!("ℹ️ User <code>{target}</code> has never used the bot"),
        Err(e) => {
            error!("Failed to reset user {target}: {e}");
            views::TEMPORARY_FAILURE.to_string()
        }
    };
    send_html_resilient(&bot, msg.chat.id, reply, None).await?;
    Ok(())
}

/// Premium handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn premium(
    bot: Bot,
    msg: Message,
    args: String,
    services: Arc<RelayServices>,
) -> Result<()> {
    if !ensure_admin(&bot, &msg, &services).await {
        return Ok(());
    }

    let Some((target, action)) = parse_premium_args(&args) else {
        send_html_resilient(
            &bot,
            msg.chat.id,
            "💎 <b>Premium Management</b>\n\n\
            Grant: <code>/premium &lt;user_id&gt; [grant]</code>\n\
            Remove: <code>/premium &lt;user_id&gt; remove</code>",
            None,
        )
        .await?;
        return Ok(());
    };

    let is_premium = action == PremiumAction::Grant;
    let reply = match services.gate.set_premium(target, is_premium).await {
        Ok(()) if is_premium => format!("✅ Premium granted to user <code>{target}</code>"),
        Ok(()) => format!("❌ Premium removed from user <code>{target}</code>"),
        Err(e) => {
            error!("Failed to update premium for user {target}: {e}");
            views::TEMPORARY_FAILURE.to_string()
        }
    };
    send_html_resilient(&bot, msg.chat.id, reply, None).await?;
    Ok(())
}

/// Broadcast handler. Replying to a message broadcasts it right away;
/// otherwise the admin's next message is broadcast.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn broadcast(bot: Bot, msg: Message, services: Arc<RelayServices>) -> Result<()> {
    if !ensure_admin(&bot, &msg, &services).await {
        return Ok(());
    }

    if let Some(source) = msg.reply_to_message() {
        spawn_broadcast(bot.clone(), msg.chat.id, source.id, services.clone());
        return Ok(());
    }

    let admin_id = get_user_id_safe(&msg);
    services
        .admin_sessions
        .begin(admin_id, PendingAction::Broadcast)
        .await;
    send_html_resilient(
        &bot,
        msg.chat.id,
        "📢 <b>Broadcast</b>\n\nSend the message to broadcast, or /cancel.",
        None,
    )
    .await?;
    Ok(())
}

/// Shortlink handler: sets the provider from arguments, or shows the current
/// one and waits for `<url> <api_key>`.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn shortlink(
    bot: Bot,
    msg: Message,
    args: String,
    services: Arc<RelayServices>,
) -> Result<()> {
    if !ensure_admin(&bot, &msg, &services).await {
        return Ok(());
    }

    if let Some(settings) = parse_shortlink_args(&args) {
        return save_shortlink(&bot, &msg, &services, settings).await;
    }

    let current = match services.store.get_shortlink_settings().await {
        Ok(Some(settings)) => Some(settings),
        Ok(None) => services.settings.relay.default_shortlink(),
        Err(e) => {
            warn!("Failed to read shortlink settings: {e}");
            services.settings.relay.default_shortlink()
        }
    };
    let current_line = current.map_or_else(
        || "not configured".to_string(),
        |s| {
            format!(
                "<code>{}</code> (key {})",
                encode_text(&s.url),
                mask_key(&s.api_key)
            )
        },
    );

    let admin_id = get_user_id_safe(&msg);
    services
        .admin_sessions
        .begin(admin_id, PendingAction::ShortlinkConfig)
        .await;
    send_html_resilient(
        &bot,
        msg.chat.id,
        format!(
            "🔗 <b>Shortlink provider</b>\n\nCurrent: {current_line}\n\n\
            Send <code>&lt;url&gt; &lt;api_key&gt;</code> to replace it, or /cancel."
        ),
        None,
    )
    .await?;
    Ok(())
}

async fn save_shortlink(
    bot: &Bot,
    msg: &Message,
    services: &RelayServices,
    settings: ShortlinkSettings,
) -> Result<()> {
    let url = settings.url.clone();
    let reply = match services.store.put_shortlink_settings(settings).await {
        Ok(()) => {
            info!("Shortlink provider changed to {url} by {}", get_user_id_safe(msg));
            format!("✅ Shortlink provider set to <code>{}</code>", encode_text(&url))
        }
        Err(e) => {
            error!("Failed to save shortlink settings: {e}");
            views::TEMPORARY_FAILURE.to_string()
        }
    };
    send_html_resilient(bot, msg.chat.id, reply, None).await?;
    Ok(())
}

/// Cancel handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn cancel(bot: Bot, msg: Message, services: Arc<RelayServices>) -> Result<()> {
    if !ensure_admin(&bot, &msg, &services).await {
        return Ok(());
    }
    let reply = if services.admin_sessions.cancel(get_user_id_safe(&msg)).await {
        "❎ Cancelled."
    } else {
        "Nothing to cancel."
    };
    send_html_resilient(&bot, msg.chat.id, reply, None).await?;
    Ok(())
}

/// Completes a pending admin action with the admin's message
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_pending(
    bot: Bot,
    msg: Message,
    action: PendingAction,
    services: Arc<RelayServices>,
) -> Result<()> {
    match action {
        PendingAction::Broadcast => {
            spawn_broadcast(bot, msg.chat.id, msg.id, services);
            Ok(())
        }
        PendingAction::ShortlinkConfig => {
            let Some(settings) = msg.text().and_then(parse_shortlink_args) else {
                send_html_resilient(
                    &bot,
                    msg.chat.id,
                    "❌ Expected <code>&lt;url&gt; &lt;api_key&gt;</code>. Run /shortlink again.",
                    None,
                )
                .await?;
                return Ok(());
            };
            save_shortlink(&bot, &msg, &services, settings).await
        }
    }
}

fn spawn_broadcast(bot: Bot, admin_chat: ChatId, source: MessageId, services: Arc<RelayServices>) {
    tokio::spawn(async move {
        if let Err(e) = run_broadcast(&bot, admin_chat, source, &services).await {
            error!("Broadcast failed: {e}");
        }
    });
}

async fn run_broadcast(
    bot: &Bot,
    admin_chat: ChatId,
    source: MessageId,
    services: &RelayServices,
) -> Result<()> {
    let users = services.store.list_user_ids().await?;
    let total = users.len();
    info!("Broadcasting message {} to {total} users", source.0);

    let status = send_html_resilient(
        bot,
        admin_chat,
        views::broadcast_text(0, 0, total, false),
        None,
    )
    .await?;

    let (mut success, mut failed) = (0, 0);
    for user_id in users {
        match bot.copy_message(ChatId(user_id), admin_chat, source).await {
            Ok(_) => success += 1,
            Err(e) => {
                failed += 1;
                warn!("Broadcast to {user_id} failed: {e}");
            }
        }

        if (success + failed) % BROADCAST_PROGRESS_EVERY == 0 {
            edit_html_safe_resilient(
                bot,
                admin_chat,
                status.id,
                &views::broadcast_text(success, failed, total, false),
            )
            .await;
            tokio::time::sleep(Duration::from_millis(BROADCAST_PAUSE_MS)).await;
        }
    }

    info!("Broadcast finished: {success} delivered, {failed} failed");
    edit_html_safe_resilient(
        bot,
        admin_chat,
        status.id,
        &views::broadcast_text(success, failed, total, true),
    )
    .await;
    Ok(())
}
