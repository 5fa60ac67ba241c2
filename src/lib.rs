//! Reaction-scored community bot for Discord.
//!
//! Transport lives in `gateway` (WebSocket) and `http` (REST); `bot` owns the
//! shared state and event loop, `handlers` reacts to events.

pub mod backfill;
pub mod bot;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod ledger;
pub mod liveness;
pub mod permissions;
pub mod reactions;
pub mod reminder;
pub mod schedule;
pub mod store;
pub mod types;

use tracing::{error, info};

pub use crate::bot::Bot;
pub use crate::config::BotConfig;
pub use crate::error::BotError;

/// Load persisted state and run every task until the gateway gives up.
pub async fn run(config: BotConfig) -> Result<(), BotError> {
    info!(?config, "starting");
    let store = store::HostStore::load(&config.data_file)?;
    let liveness_addr = config.liveness_addr;
    let bot = Bot::new(config, store);
    info!(valued_emoji = bot.table.len(), "reaction table loaded");

    tokio::spawn(async move {
        if let Err(e) = liveness::serve(liveness_addr).await {
            error!(addr = %liveness_addr, error = %e, "liveness endpoint stopped");
        }
    });
    tokio::spawn(reminder::run(bot.clone()));

    bot::run_gateway(bot).await?;
    Ok(())
}

#[cfg(test)]
mod test_support;
