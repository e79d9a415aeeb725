//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines the
//! access policy constants.

use crate::model::{ShortlinkSettings, UserId};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Storage backend selected at startup
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Cloudflare R2 / S3 bucket
    #[default]
    R2,
    /// Process-local maps, lost on restart
    Memory,
}

/// Relay settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RelaySettings {
    /// Comma-separated list of administrator user IDs
    #[serde(rename = "admins")]
    pub admin_ids_str: Option<String>,

    /// Chat that holds archived uploads
    pub storage_channel_id: Option<i64>,

    /// Storage backend
    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,

    /// Default shortlink provider base URL
    pub shortlink_url: Option<String>,
    /// Default shortlink provider API key
    pub shortlink_api_key: Option<String>,

    /// Where users are sent to arrange premium access
    pub premium_contact: Option<String>,
}

/// Builds the layered configuration shared by core and transport settings.
///
/// # Errors
///
/// Returns a `ConfigError` if a configuration source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE to snake_case
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl RelaySettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings: Self = build_config()?.try_deserialize()?;

        // The R2 variables are sometimes missed by the automatic mapping
        fill_from_env(&mut settings.r2_endpoint_url, "R2_ENDPOINT_URL");
        fill_from_env(&mut settings.r2_access_key_id, "R2_ACCESS_KEY_ID");
        fill_from_env(&mut settings.r2_secret_access_key, "R2_SECRET_ACCESS_KEY");
        fill_from_env(&mut settings.r2_bucket_name, "R2_BUCKET_NAME");

        Ok(settings)
    }

    /// Returns the set of user IDs allowed to run administrative commands
    #[must_use]
    pub fn admin_ids(&self) -> HashSet<UserId> {
        self.admin_ids_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<UserId>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `user_id` is an administrator
    #[must_use]
    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_ids().contains(&user_id)
    }

    /// Shortlink provider used until an administrator overrides it at runtime
    #[must_use]
    pub fn default_shortlink(&self) -> Option<ShortlinkSettings> {
        match (&self.shortlink_url, &self.shortlink_api_key) {
            (Some(url), Some(api_key)) if !url.is_empty() => Some(ShortlinkSettings {
                url: url.clone(),
                api_key: api_key.clone(),
            }),
            _ => None,
        }
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.is_none() {
        if let Ok(val) = std::env::var(var) {
            if !val.is_empty() {
                *slot = Some(val);
            }
        }
    }
}

/// Free redemptions per account between verifications
pub const FREE_LIMIT: u32 = 3;
/// Verification token validity window
pub const VERIFICATION_VALIDITY_HOURS: i64 = 6;
/// Length of a verification token (alphanumeric, ~190 bits)
pub const TOKEN_LENGTH: usize = 32;
/// Attempts for a conditional (compare-and-swap) record update
pub const CAS_MAX_ATTEMPTS: usize = 5;
/// Maximum cached file records
pub const FILE_CACHE_MAX_SIZE: u64 = 10_000;

/// Interval between expiry sweeps (seconds). Default: 1 hour.
pub const SWEEP_INTERVAL_SECS: u64 = 3600;
/// Upper bound for a shortlink provider call (seconds).
pub const SHORTLINK_TIMEOUT_SECS: u64 = 10;
/// Lifetime of a pending admin action (seconds). Default: 5 minutes.
pub const ADMIN_SESSION_TTL_SECS: u64 = 300;
/// Maximum tracked admin sessions.
pub const ADMIN_SESSION_MAX_SIZE: u64 = 1_000;

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Get sweep interval from env or default.
///
/// Environment variable: `SWEEP_INTERVAL_SECS`.
#[must_use]
pub fn get_sweep_interval_secs() -> u64 {
    env_u64("SWEEP_INTERVAL_SECS", SWEEP_INTERVAL_SECS)
}

/// Get shortlink timeout from env or default.
///
/// Environment variable: `SHORTLINK_TIMEOUT_SECS`.
#[must_use]
pub fn get_shortlink_timeout_secs() -> u64 {
    env_u64("SHORTLINK_TIMEOUT_SECS", SHORTLINK_TIMEOUT_SECS)
}

/// Get admin session TTL from env or default.
///
/// Environment variable: `ADMIN_SESSION_TTL_SECS`.
#[must_use]
pub fn get_admin_session_ttl_secs() -> u64 {
    env_u64("ADMIN_SESSION_TTL_SECS", ADMIN_SESSION_TTL_SECS)
}
