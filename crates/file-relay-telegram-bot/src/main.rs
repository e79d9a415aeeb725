mod redact;

use dotenvy::dotenv;
use file_relay_core::config::RelaySettings;
use file_relay_transport_telegram::config::{BotSettings, TelegramSettings};
use file_relay_transport_telegram::runner::run_bot;
use redact::{RedactingMakeWriter, RedactionPatterns};
use std::io;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "file_relay_core=info,file_relay_transport_telegram=info,\
hyper=warn,h2=error,reqwest=warn,tokio=warn,tower=warn,aws_config=warn,aws_smithy_runtime=warn";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Compiled before logging so nothing is written unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting File Relay TG Bot...");

    let settings = init_settings();

    run_bot(settings).await;

    info!("File Relay TG Bot stopped.");
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<BotSettings> {
    let relay_settings = match RelaySettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load relay configuration: {}", e);
            std::process::exit(1);
        }
    };
    let telegram_settings = match TelegramSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load telegram configuration: {}", e);
            std::process::exit(1);
        }
    };

    if telegram_settings.telegram_token.is_empty() {
        error!("TELEGRAM_TOKEN is not set.");
        std::process::exit(1);
    }
    if relay_settings.admin_ids().is_empty() {
        info!("No administrators configured: admin commands are disabled.");
    }

    info!("Configuration loaded successfully.");
    Arc::new(BotSettings::new(relay_settings, telegram_settings))
}
