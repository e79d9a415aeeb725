//! Message texts and inline keyboards (HTML parse mode).

use chrono::{DateTime, Utc};
use file_relay_core::gate::Challenge;
use file_relay_core::ledger::TokenStatus;
use file_relay_core::model::FileRecord;
use file_relay_core::sweeper::SweeperSnapshot;
use file_relay_core::utils::{format_file_size, format_remaining};
use html_escape::encode_text;
use reqwest::Url;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Callback data of the "check time left" button, followed by the token
pub const CHECK_TIME_PREFIX: &str = "check_time_";
/// Callback data of the premium info button
pub const PREMIUM_INFO: &str = "premium_info";
/// Callback data of the help button
pub const HELP: &str = "help";

/// Generic reply for failed verifications (expired, reused or invalid)
pub const VERIFICATION_FAILED: &str = "❌ <b>Verification failed!</b>\n\n\
The verification link is invalid, expired or already used.\n\
Request the file again to get a new link.";
/// Reply when a link points at nothing
pub const FILE_NOT_FOUND: &str = "❌ File not found. The link may be broken.";
/// Reply when the stored copy cannot be relayed
pub const FILE_UNAVAILABLE: &str =
    "⚠️ This file is currently unavailable. Please try again later.";
/// Reply when storage is down
pub const TEMPORARY_FAILURE: &str = "⚠️ Something went wrong. Please try again in a moment.";
/// Reply when uploads are not configured
pub const UPLOADS_DISABLED: &str = "⚠️ Uploads are disabled on this bot.";
/// Reply to non-admins using admin commands
pub const ACCESS_DENIED: &str = "⛔️ Access denied";

/// Welcome text for a plain `/start`
#[must_use]
pub fn welcome_text(first_name: &str, free_limit: u32) -> String {
    format!(
        "🔥 <b>Welcome to File Relay!</b>\n\n\
        Hi {}! 👋\n\n\
        <b>What I can do:</b>\n\
        • 📁 Store your files\n\
        • 🔗 Generate shareable links\n\
        • 🔐 Gate access behind a quick verification\n\n\
        Send me any document, video, audio or photo to get a link.\n\n\
        <i>The first {free_limit} files are free, then a verification is required. \
        Premium users never need to verify.</i>",
        encode_text(first_name)
    )
}

/// Help text
#[must_use]
pub fn help_text(free_limit: u32, validity_hours: i64) -> String {
    format!(
        "ℹ️ <b>How it works</b>\n\n\
        1. Send me a file and I reply with a sharing link.\n\
        2. Anyone opening the link gets the file.\n\
        3. After {free_limit} free files a verification link is shown. \
        It stays valid for {validity_hours} hours and can be used once.\n\
        4. Completing it delivers the file and restores your free quota."
    )
}

/// Premium info. Payment is arranged manually with `contact`.
#[must_use]
pub fn premium_text(contact: Option<&str>) -> String {
    let contact_line = contact.map_or_else(
        || "Contact the bot administrator to upgrade.".to_string(),
        |c| format!("Contact {} to upgrade.", encode_text(c)),
    );
    format!(
        "💎 <b>Premium Membership</b>\n\n\
        • ✅ Unlimited file access\n\
        • ✅ No verification required\n\n\
        {contact_line}"
    )
}

/// Challenge shown once the free quota is exhausted
#[must_use]
pub fn challenge_text(challenge: &Challenge, validity_hours: i64) -> String {
    format!(
        "🔐 <b>Verification Required!</b>\n\n\
        You've reached your free file limit ({}).\n\n\
        <b>To get this file:</b>\n\
        1. Tap <b>Verify Now</b>\n\
        2. Complete the quick verification\n\
        3. You'll be sent back here with your file\n\n\
        ⏰ The link is valid for {validity_hours} hours (until {}).\n\n\
        💎 Or upgrade to Premium for unlimited access!",
        challenge.free_limit,
        format_expiry(challenge.expires_at)
    )
}

/// Keyboard attached to a challenge
#[must_use]
pub fn challenge_keyboard(challenge: &Challenge) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    let url = Url::parse(&challenge.link).or_else(|_| Url::parse(&challenge.direct_link));
    if let Ok(url) = url {
        rows.push(vec![InlineKeyboardButton::url("✅ Verify Now", url)]);
    }
    rows.push(vec![
        InlineKeyboardButton::callback(
            "⏰ Check time left",
            format!("{CHECK_TIME_PREFIX}{}", challenge.token),
        ),
        InlineKeyboardButton::callback("💎 Premium", PREMIUM_INFO),
    ]);
    InlineKeyboardMarkup::new(rows)
}

/// Answer to the "check time left" button
#[must_use]
pub fn time_left_text(status: TokenStatus) -> String {
    match status {
        TokenStatus::Remaining(left) => format!("⏰ {}", format_remaining(left)),
        TokenStatus::Expired => "⌛ Expired. Request the file again.".to_string(),
        TokenStatus::NotFound => "❌ This verification link is no longer valid.".to_string(),
    }
}

/// Reply after a successful upload
#[must_use]
pub fn upload_text(record: &FileRecord, direct_link: &str, short_link: &str) -> String {
    let mut text = format!(
        "📁 <b>File Uploaded Successfully!</b>\n\n\
        • <b>Name:</b> {}\n\
        • <b>Size:</b> {}\n\
        • <b>Type:</b> {}\n\n\
        🔗 <b>Link:</b> <code>{}</code>",
        encode_text(&record.file_name),
        format_file_size(record.file_size),
        record.kind.as_str().to_uppercase(),
        encode_text(direct_link)
    );
    if short_link != direct_link {
        text.push_str(&format!(
            "\n🔗 <b>Short link:</b> <code>{}</code>",
            encode_text(short_link)
        ));
    }
    text
}

/// Keyboard attached to an upload reply
#[must_use]
pub fn upload_keyboard(share_link: &str) -> Option<InlineKeyboardMarkup> {
    let url = Url::parse(share_link).ok()?;
    Some(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url("🔗 Open link", url),
    ]]))
}

/// Keyboard for the welcome message
#[must_use]
pub fn start_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("💎 Get Premium", PREMIUM_INFO),
        InlineKeyboardButton::callback("ℹ️ Help", HELP),
    ]])
}

/// Admin statistics
#[must_use]
pub fn stats_text(
    users: usize,
    sweeper: SweeperSnapshot,
    silenced_denials: u64,
    cooldown_mins: u64,
) -> String {
    let last_sweep = sweeper
        .last_run
        .map_or_else(|| "never".to_string(), format_expiry);
    format!(
        "📊 <b>Bot Statistics</b>\n\n\
        👥 <b>Users:</b> {users}\n\n\
        <b>Expiry sweeper:</b>\n\
        • Sweeps: {}\n\
        • Failed sweeps: {}\n\
        • Tokens removed: {}\n\
        • Last run: {last_sweep}\n\n\
        <b>Denial throttle:</b>\n\
        • Cooldown: {cooldown_mins} min.\n\
        • Silenced attempts: {silenced_denials}",
        sweeper.sweeps, sweeper.failures, sweeper.removed
    )
}

/// Broadcast progress or summary
#[must_use]
pub fn broadcast_text(success: usize, failed: usize, total: usize, done: bool) -> String {
    let title = if done {
        "📢 <b>Broadcast Complete!</b>"
    } else {
        "📢 <b>Broadcasting...</b>"
    };
    format!(
        "{title}\n\n\
        ✅ <b>Success:</b> {success}\n\
        ❌ <b>Failed:</b> {failed}\n\
        👥 <b>Total:</b> {total}"
    )
}

fn format_expiry(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}
