use crate::bot;
use crate::bot::handlers::Command;
use crate::bot::relay::TelegramRelay;
use crate::bot::DenialThrottle;
use crate::config::{get_unauthorized_cache_max_size, get_unauthorized_cooldown, BotSettings};
use crate::services::RelayServices;
use file_relay_core::admin::AdminSessions;
use file_relay_core::catalog::FileCatalog;
use file_relay_core::clock::{Clock, SystemClock};
use file_relay_core::config::{
    get_admin_session_ttl_secs, get_shortlink_timeout_secs, get_sweep_interval_secs,
    StorageBackend, ADMIN_SESSION_MAX_SIZE,
};
use file_relay_core::gate::{AccessGate, AccessPolicy};
use file_relay_core::ledger::TokenLedger;
use file_relay_core::link::LinkBuilder;
use file_relay_core::shortlink::{HttpShortener, Shortener};
use file_relay_core::storage::{InMemoryStorage, R2Storage, RelayStore};
use file_relay_core::sweeper::ExpirySweeper;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run the Telegram transport runtime.
pub async fn run_bot(settings: Arc<BotSettings>) {
    let store = init_storage(&settings).await;
    let bot = Bot::new(settings.telegram.telegram_token.clone());
    let bot_username = resolve_bot_username(&bot, &settings).await;
    info!("Deep links will point at @{bot_username}");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let policy = AccessPolicy {
        shortlink_timeout: Duration::from_secs(get_shortlink_timeout_secs()),
        ..AccessPolicy::default()
    };
    let ledger = Arc::new(TokenLedger::new(
        store.clone(),
        clock.clone(),
        policy.validity,
    ));
    let shortener: Arc<dyn Shortener> = Arc::new(HttpShortener::new(
        store.clone(),
        settings.relay.default_shortlink(),
        policy.shortlink_timeout,
    ));
    let gate = Arc::new(AccessGate::new(
        store.clone(),
        ledger.clone(),
        shortener.clone(),
        LinkBuilder::new(bot_username),
        clock.clone(),
        policy,
    ));

    let storage_chat = settings.relay.storage_channel_id;
    if storage_chat.is_none() {
        warn!("STORAGE_CHANNEL_ID is not set: uploads are disabled, stored files are still served.");
    }
    let catalog = Arc::new(FileCatalog::new(
        store.clone(),
        Arc::new(TelegramRelay::new(bot.clone())),
        clock.clone(),
        storage_chat,
    ));

    let sweeper = ExpirySweeper::new(ledger, Duration::from_secs(get_sweep_interval_secs()));
    let sweeper_stats = sweeper.stats();
    let cancel = CancellationToken::new();
    let sweeper_handle = sweeper.spawn(cancel.clone());

    let services = Arc::new(RelayServices {
        settings,
        store,
        gate,
        catalog,
        shortener,
        admin_sessions: AdminSessions::new(
            Duration::from_secs(get_admin_session_ttl_secs()),
            ADMIN_SESSION_MAX_SIZE,
        ),
        denial_throttle: init_denial_throttle(),
        sweeper_stats,
        clock,
    });
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![services])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, shutting down the expiry sweeper.");
    cancel.cancel();
    if let Err(e) = sweeper_handle.await {
        error!("Expiry sweeper task failed: {e}");
    }
}

async fn init_storage(settings: &BotSettings) -> Arc<dyn RelayStore> {
    match settings.relay.storage_backend {
        StorageBackend::R2 => match R2Storage::new(settings.relay.as_ref()).await {
            Ok(s) => {
                info!("R2 Storage initialized.");
                if let Err(e) = s.check_connection().await {
                    error!("R2 Storage is unreachable, refusing to start: {e}");
                    std::process::exit(1);
                }
                Arc::new(s)
            }
            Err(e) => {
                error!("Failed to initialize R2 Storage: {}", e);
                std::process::exit(1);
            }
        },
        StorageBackend::Memory => {
            warn!("Using in-memory storage: all accounts, files and tokens are lost on restart.");
            Arc::new(InMemoryStorage::new())
        }
    }
}

async fn resolve_bot_username(bot: &Bot, settings: &BotSettings) -> String {
    if let Some(name) = settings
        .telegram
        .bot_username
        .as_deref()
        .map(|n| n.trim_start_matches('@'))
        .filter(|n| !n.is_empty())
    {
        return name.to_string();
    }

    match bot.get_me().await {
        Ok(me) => me.user.username.clone().unwrap_or_else(|| {
            error!("Bot account has no username, deep links cannot be built.");
            std::process::exit(1);
        }),
        Err(e) => {
            error!("Failed to resolve the bot username: {e}");
            std::process::exit(1);
        }
    }
}

fn init_denial_throttle() -> DenialThrottle {
    let cooldown = get_unauthorized_cooldown();
    let max_size = get_unauthorized_cache_max_size();
    info!("Denial replies limited to one per {cooldown}s per user (tracking up to {max_size} users)");
    DenialThrottle::new(Duration::from_secs(cooldown), max_size)
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.chat.is_private())
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(dptree::endpoint(handle_message)),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    services: Arc<RelayServices>,
) -> Result<(), teloxide::RequestError> {
    use crate::bot::admin_handlers as admin;
    use crate::bot::handlers;

    let res = match cmd {
        Command::Start(param) => Box::pin(handlers::start(bot, msg, param, services)).await,
        Command::Help => handlers::help(bot, msg, services).await,
        Command::Healthcheck => handlers::healthcheck(bot, msg, services).await,
        Command::Stats => admin::stats(bot, msg, services).await,
        Command::Reset(args) => admin::reset(bot, msg, args, services).await,
        Command::Premium(args) => admin::premium(bot, msg, args, services).await,
        Command::Broadcast => admin::broadcast(bot, msg, services).await,
        Command::Shortlink(args) => admin::shortlink(bot, msg, args, services).await,
        Command::Cancel => admin::cancel(bot, msg, services).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    services: Arc<RelayServices>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(bot::handlers::handle_message(bot, msg, services)).await {
        error!("Message handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    services: Arc<RelayServices>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::callbacks::handle_callback(bot, q, services).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}
