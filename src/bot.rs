//! Shared bot state and the gateway event loop.
//!
//! Everything mutable lives in one [`BotState`] behind an `async_lock::Mutex`
//! owned by [`Bot`]. Handlers take the lock for short, synchronous critical
//! sections and release it before touching the network.

use std::collections::HashSet;
use std::sync::Arc;

use async_lock::Mutex;
use tracing::{info, trace, warn};

use crate::cache::GuildCache;
use crate::config::BotConfig;
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, GatewayError, GatewayHandle, Intents};
use crate::handlers;
use crate::http::DiscordHttpClient;
use crate::ledger::ScoreLedger;
use crate::reactions::ReactionTable;
use crate::store::HostStore;
use crate::types::Snowflake;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Mutable state shared by the event loop and background tasks.
#[derive(Debug)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    pub bot_user_id: Option<Snowflake>,
    /// The application ID (set on READY).
    pub application_id: Option<Snowflake>,
    /// Whether slash commands have been registered this session.
    pub commands_registered: bool,
    pub ledger: ScoreLedger,
    pub store: HostStore,
    pub cache: GuildCache,
    /// Guilds whose history was already scanned.
    pub backfilled: HashSet<Snowflake>,
    /// `(year, month)` of the last reminder sent.
    pub reminder_fired: Option<(i32, u32)>,
}

impl BotState {
    pub fn new(store: HostStore) -> Self {
        Self {
            bot_user_id: None,
            application_id: None,
            commands_registered: false,
            ledger: ScoreLedger::new(),
            store,
            cache: GuildCache::new(),
            backfilled: HashSet::new(),
            reminder_fired: None,
        }
    }

    pub fn is_self(&self, user_id: &str) -> bool {
        self.bot_user_id.as_deref() == Some(user_id)
    }
}

/// Immutable configuration plus the locked [`BotState`].
#[derive(Debug)]
pub struct Bot {
    pub config: BotConfig,
    pub http: DiscordHttpClient,
    pub table: ReactionTable,
    pub state: Mutex<BotState>,
}

impl Bot {
    pub fn new(config: BotConfig, store: HostStore) -> Arc<Self> {
        let http = DiscordHttpClient::new(config.token.clone());
        Self::with_http(config, store, http)
    }

    pub fn with_http(config: BotConfig, store: HostStore, http: DiscordHttpClient) -> Arc<Self> {
        Arc::new(Self {
            config,
            http,
            table: ReactionTable::default(),
            state: Mutex::new(BotState::new(store)),
        })
    }
}

// ---------------------------------------------------------------------------
// Gateway intents
// ---------------------------------------------------------------------------

pub fn gateway_intents() -> Intents {
    Intents::GUILDS
        | Intents::GUILD_MEMBERS
        | Intents::GUILD_MESSAGES
        | Intents::GUILD_MESSAGE_REACTIONS
        | Intents::MESSAGE_CONTENT
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Connect to the gateway and dispatch events until the driver gives up.
pub async fn run_gateway(bot: Arc<Bot>) -> Result<(), GatewayError> {
    let config = GatewayConfig::new(bot.config.token.clone(), gateway_intents());
    drive(bot, gateway::connect(config)).await
}

/// Dispatch events from `gw` until its stream ends, then return how the
/// driver finished.
pub async fn drive(bot: Arc<Bot>, mut gw: GatewayHandle) -> Result<(), GatewayError> {
    info!("gateway started, entering event loop");

    while let Some(event) = gw.events.recv().await {
        dispatch(&bot, event).await;
    }

    warn!("event stream ended");
    gw.driver.await?
}

/// Apply one event. Cache updates happen inline so later events see them;
/// reactions and interactions make REST calls and run as their own tasks.
pub async fn dispatch(bot: &Arc<Bot>, event: GatewayEvent) {
    trace!(event = event.name(), "dispatching");
    match event {
        GatewayEvent::Ready(ready) => handlers::on_ready(bot, ready).await,
        GatewayEvent::GuildCreate(guild) => handlers::on_guild_create(bot, guild).await,
        GatewayEvent::GuildDelete(guild) => {
            let mut state = bot.state.lock().await;
            if state.cache.remove_guild(&guild.id).is_some() {
                info!(guild_id = %guild.id, unavailable = guild.unavailable, "guild removed");
            }
        }
        GatewayEvent::ChannelCreate(channel) | GatewayEvent::ChannelUpdate(channel) => {
            bot.state.lock().await.cache.upsert_channel(channel);
        }
        GatewayEvent::ChannelDelete(channel) => {
            bot.state.lock().await.cache.remove_channel(&channel);
        }
        GatewayEvent::ReactionAdd(reaction) => {
            let bot = bot.clone();
            tokio::spawn(async move { handlers::on_reaction_add(&bot, reaction).await });
        }
        GatewayEvent::InteractionCreate(interaction) => {
            let bot = bot.clone();
            tokio::spawn(async move { handlers::on_interaction(&bot, interaction).await });
        }

        // Handled inside the gateway driver.
        GatewayEvent::HeartbeatAck
        | GatewayEvent::HeartbeatRequest
        | GatewayEvent::Reconnect
        | GatewayEvent::InvalidSession(_) => {}

        GatewayEvent::Unknown { op, .. } => {
            trace!(op, "unhandled gateway event");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
