use crate::bot::resilient::send_html_resilient;
use crate::bot::{admin_handlers, views};
use crate::services::RelayServices;
use anyhow::Result;
use file_relay_core::catalog::IncomingFile;
use file_relay_core::config::VERIFICATION_VALIDITY_HOURS;
use file_relay_core::gate::{AccessDecision, AccessGrant, Challenge, VerificationOutcome};
use file_relay_core::link::StartParam;
use file_relay_core::model::{ContentKind, FileHandle, FileRecord, StorageLocation};
use file_relay_core::shortlink::shorten_or_fallback;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};
use tracing::{error, info, warn};

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Welcome message, or a file / verification deep link
    #[command(description = "Start the bot.")]
    Start(String),
    /// How the bot works
    #[command(description = "Show help.")]
    Help,
    /// Check bot health
    #[command(description = "Check bot health.")]
    Healthcheck,
    /// Show bot statistics (admin)
    #[command(description = "Show bot statistics.")]
    Stats,
    /// Reset a user's quota and tokens (admin)
    #[command(description = "Reset a user's free quota: /reset <user_id>")]
    Reset(String),
    /// Grant or remove premium (admin)
    #[command(description = "Manage premium: /premium <user_id> [grant|remove]")]
    Premium(String),
    /// Broadcast the next message to all users (admin)
    #[command(description = "Broadcast a message to all users.")]
    Broadcast,
    /// Show or replace the shortlink provider (admin)
    #[command(description = "Set the shortlink provider: /shortlink <url> <api_key>")]
    Shortlink(String),
    /// Abort a pending admin action
    #[command(description = "Cancel the pending admin action.")]
    Cancel,
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Display name for logs
pub(crate) fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// Start handler: welcome message, file request or verification.
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn start(
    bot: Bot,
    msg: Message,
    param: String,
    services: Arc<RelayServices>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let username = msg.from.as_ref().and_then(|u| u.username.clone());

    match StartParam::parse(&param) {
        Some(StartParam::Verify(token)) => {
            register_user(&msg, &services).await;
            handle_verification(&bot, &msg, &services, &token).await
        }
        // The gate registers the user itself
        Some(StartParam::File(handle)) => {
            handle_file_request(&bot, &msg, &services, username, &handle).await
        }
        None if !param.trim().is_empty() => {
            info!("User {user_id} opened an undecodable link");
            send_html_resilient(&bot, msg.chat.id, views::FILE_NOT_FOUND, None).await?;
            Ok(())
        }
        None => {
            register_user(&msg, &services).await;
            info!("User {user_id} ({}) initiated /start command.", get_user_name(&msg));
            let first_name = msg.from.as_ref().map_or("there", |u| u.first_name.as_str());
            send_html_resilient(
                &bot,
                msg.chat.id,
                views::welcome_text(first_name, services.gate.policy().free_limit),
                Some(views::start_keyboard()),
            )
            .await?;
            Ok(())
        }
    }
}

async fn register_user(msg: &Message, services: &RelayServices) {
    let user_id = get_user_id_safe(msg);
    let username = msg.from.as_ref().and_then(|u| u.username.clone());
    if let Err(e) = services
        .store
        .ensure_account(user_id, username, services.clock.now())
        .await
    {
        error!("Failed to register user {user_id}: {e}");
    }
}

async fn handle_file_request(
    bot: &Bot,
    msg: &Message,
    services: &RelayServices,
    username: Option<String>,
    handle: &FileHandle,
) -> Result<()> {
    let user_id = get_user_id_safe(msg);
    let decision = match services.gate.request_file(user_id, username, handle).await {
        Ok(decision) => decision,
        Err(e) => {
            error!("Access check failed for user {user_id}, file {handle}: {e}");
            send_html_resilient(bot, msg.chat.id, views::TEMPORARY_FAILURE, None).await?;
            return Ok(());
        }
    };

    match decision {
        AccessDecision::Deliver { file, grant } => {
            deliver(bot, msg.chat.id, services, &file).await?;
            if let AccessGrant::FreeQuota { used, limit } = grant {
                if used == limit {
                    send_html_resilient(
                        bot,
                        msg.chat.id,
                        format!("ℹ️ That was your last free file ({used}/{limit})."),
                        None,
                    )
                    .await?;
                }
            }
        }
        AccessDecision::Challenge(challenge) => send_challenge(bot, msg.chat.id, &challenge).await?,
        AccessDecision::FileNotFound => {
            send_html_resilient(bot, msg.chat.id, views::FILE_NOT_FOUND, None).await?;
        }
    }
    Ok(())
}

async fn send_challenge(bot: &Bot, chat_id: ChatId, challenge: &Challenge) -> Result<()> {
    send_html_resilient(
        bot,
        chat_id,
        views::challenge_text(challenge, VERIFICATION_VALIDITY_HOURS),
        Some(views::challenge_keyboard(challenge)),
    )
    .await?;
    Ok(())
}

async fn handle_verification(
    bot: &Bot,
    msg: &Message,
    services: &RelayServices,
    token: &str,
) -> Result<()> {
    let user_id = get_user_id_safe(msg);
    let outcome = match services.gate.redeem_verification(user_id, token).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Verification failed for user {user_id}: {e}");
            send_html_resilient(bot, msg.chat.id, views::TEMPORARY_FAILURE, None).await?;
            return Ok(());
        }
    };

    match outcome {
        VerificationOutcome::Delivered(file) => {
            send_html_resilient(
                bot,
                msg.chat.id,
                "✅ <b>Verification successful!</b>\nYour free file counter has been reset.",
                None,
            )
            .await?;
            deliver(bot, msg.chat.id, services, &file).await?;
        }
        VerificationOutcome::VerifiedFileMissing(handle) => {
            warn!("Verified user {user_id} but file {handle} is gone");
            send_html_resilient(
                bot,
                msg.chat.id,
                format!(
                    "✅ <b>Verification successful!</b>\nYour free file counter has been reset.\n\n{}",
                    views::FILE_NOT_FOUND
                ),
                None,
            )
            .await?;
        }
        VerificationOutcome::Failed => {
            send_html_resilient(bot, msg.chat.id, views::VERIFICATION_FAILED, None).await?;
        }
    }
    Ok(())
}

async fn deliver(
    bot: &Bot,
    chat_id: ChatId,
    services: &RelayServices,
    file: &FileRecord,
) -> Result<()> {
    if services.catalog.deliver(file, chat_id.0).await.is_err() {
        send_html_resilient(bot, chat_id, views::FILE_UNAVAILABLE, None).await?;
    }
    Ok(())
}

/// Help handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn help(bot: Bot, msg: Message, services: Arc<RelayServices>) -> Result<()> {
    send_html_resilient(
        &bot,
        msg.chat.id,
        views::help_text(services.gate.policy().free_limit, VERIFICATION_VALIDITY_HOURS),
        None,
    )
    .await?;
    Ok(())
}

/// Health check handler: checks the storage backend
///
/// # Errors
///
/// Returns an error if the healthcheck response cannot be sent.
pub async fn healthcheck(bot: Bot, msg: Message, services: Arc<RelayServices>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("Healthcheck command received from user {user_id}.");
    let reply = match services.store.check_connection().await {
        Ok(()) => "OK".to_string(),
        Err(e) => {
            error!("Healthcheck storage check failed: {e}");
            "DEGRADED: storage unavailable".to_string()
        }
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Extracts the uploaded file from a message, if it carries one
#[must_use]
pub fn incoming_file(msg: &Message) -> Option<IncomingFile> {
    let (file_name, size, kind) = if let Some(doc) = msg.document() {
        (doc.file_name.clone(), doc.file.size, ContentKind::Document)
    } else if let Some(video) = msg.video() {
        (video.file_name.clone(), video.file.size, ContentKind::Video)
    } else if let Some(audio) = msg.audio() {
        (audio.file_name.clone(), audio.file.size, ContentKind::Audio)
    } else if let Some(photo) = msg.photo() {
        let largest = photo.iter().max_by_key(|p| p.file.size)?;
        (None, largest.file.size, ContentKind::Photo)
    } else {
        return None;
    };

    Some(IncomingFile {
        file_name: file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("{kind}_{}", msg.id.0)),
        file_size: u64::from(size),
        kind,
        source: StorageLocation {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
        },
        uploaded_by: get_user_id_safe(msg),
    })
}

/// Upload handler: archives the file and replies with its sharing link.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_upload(
    bot: Bot,
    msg: Message,
    upload: IncomingFile,
    services: Arc<RelayServices>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    if !services.catalog.accepts_uploads() {
        send_html_resilient(&bot, msg.chat.id, views::UPLOADS_DISABLED, None).await?;
        return Ok(());
    }
    let record = match services.catalog.archive(upload).await {
        Ok(record) => record,
        Err(e) => {
            error!("Failed to archive upload from user {user_id}: {e}");
            send_html_resilient(&bot, msg.chat.id, views::TEMPORARY_FAILURE, None).await?;
            return Ok(());
        }
    };

    let direct_link = services.gate.links().file_link(&record.handle);
    let timeout = services.gate.policy().shortlink_timeout;
    let short_link = shorten_or_fallback(services.shortener.as_ref(), &direct_link, timeout).await;

    send_html_resilient(
        &bot,
        msg.chat.id,
        views::upload_text(&record, &direct_link, &short_link),
        views::upload_keyboard(&short_link),
    )
    .await?;
    Ok(())
}

/// Plain message handler: pending admin actions, uploads, or a hint.
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_message(bot: Bot, msg: Message, services: Arc<RelayServices>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);

    if services.is_admin(user_id) {
        if let Some(action) = services.admin_sessions.take(user_id).await {
            return admin_handlers::handle_pending(bot, msg, action, services).await;
        }
    }

    if let Some(upload) = incoming_file(&msg) {
        return handle_upload(bot, msg, upload, services).await;
    }

    send_html_resilient(
        &bot,
        msg.chat.id,
        "📁 Send me a document, video, audio or photo to get a sharing link. /help",
        None,
    )
    .await?;
    Ok(())
}

