/// Administrator commands and pending admin actions
pub mod admin_handlers;
/// Inline button callbacks
pub mod callbacks;
/// Throttling of "Access denied" replies
pub mod denial_throttle;
/// User-facing command and message handlers
pub mod handlers;
/// `copyMessage`-based content relay
pub mod relay;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// Message texts and keyboards
pub mod views;

pub use denial_throttle::DenialThrottle;
