#![deny(missing_docs)]
//! Telegram transport adapter for File Relay.

/// Telegram-specific bot/transport implementation.
pub mod bot;
/// Telegram transport configuration.
pub mod config;
/// Telegram runtime entrypoint.
pub mod runner;
/// Shared services handed to every handler.
pub mod services;
