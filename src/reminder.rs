//! Monthly "pick the next host" ping.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bot::{Bot, BotState};
use crate::commands::reminder_text;
use crate::schedule::{self, REMINDER_INTERVAL};
use crate::types::{CreateMessage, Snowflake};

/// Where a reminder goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderTarget {
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
    /// Message text, mentioning the guild's host role.
    pub content: String,
}

/// Decide whether a tick at `now` fires, and where to.
///
/// Marks the month as fired when it does, so the caller can send without
/// holding the state lock.
pub fn due_targets(
    state: &mut BotState,
    role_id: &str,
    now: DateTime<Utc>,
) -> Option<Vec<ReminderTarget>> {
    if !schedule::in_reminder_window(now) {
        return None;
    }
    let month = (now.year(), now.month());
    if state.reminder_fired == Some(month) {
        return None;
    }
    let bot_user_id = state.bot_user_id.clone()?;
    state.reminder_fired = Some(month);

    let targets = state
        .cache
        .guilds()
        .filter_map(|g| {
            let role = state.cache.role(&g.id, role_id)?;
            let channel = state.cache.first_sendable_channel(&g.id, &bot_user_id)?;
            Some(ReminderTarget {
                guild_id: g.id.clone(),
                channel_id: channel.id.clone(),
                content: reminder_text(role),
            })
        })
        .collect();
    Some(targets)
}

/// Tick every [`REMINDER_INTERVAL`] forever.
pub async fn run(bot: Arc<Bot>) {
    let mut interval = tokio::time::interval(REMINDER_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(every_s = REMINDER_INTERVAL.as_secs(), "reminder loop started");

    loop {
        interval.tick().await;
        tick(&bot, Utc::now()).await;
    }
}

async fn tick(bot: &Bot, now: DateTime<Utc>) {
    let role_id = &bot.config.host_role_id;
    let Some(targets) = due_targets(&mut *bot.state.lock().await, role_id, now) else {
        debug!(%now, "reminder not due");
        return;
    };
    info!(guilds = targets.len(), "sending host reminder");

    for target in targets {
        let msg = CreateMessage::new()
            .content(target.content)
            .ping_roles(vec![role_id.clone()]);
        if let Err(e) = bot.http.create_message(&target.channel_id, &msg).await {
            warn!(
                guild_id = %target.guild_id,
                channel_id = %target.channel_id,
                error = %e,
                "failed to send reminder"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
