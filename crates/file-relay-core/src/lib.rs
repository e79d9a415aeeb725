#![deny(missing_docs)]
//! File relay core library.
//!
//! Access gating, verification tokens, storage backends and the expiry sweeper
//! shared by every transport.

/// Per-admin pending actions (broadcast, shortlink configuration).
pub mod admin;
/// File catalog: archiving uploads and delivering stored files.
pub mod catalog;
/// Time source abstraction.
pub mod clock;
/// Configuration management.
pub mod config;
/// Access gate: deliver, challenge or refuse.
pub mod gate;
/// Verification token ledger.
pub mod ledger;
/// Deep-link encoding and start parameter parsing.
pub mod link;
/// Domain records.
pub mod model;
/// Content relay capability.
pub mod relay;
/// Shortlink provider client.
pub mod shortlink;
/// Storage layer (R2/S3 and in-memory).
pub mod storage;
/// Background purge of expired tokens.
pub mod sweeper;
/// Formatting helpers.
pub mod utils;

/// Mock builders for unit tests.
#[cfg(test)]
pub mod testing;
