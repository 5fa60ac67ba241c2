//! Startup replay of historical reactions.
//!
//! Scores are not persisted, so on first sight of a guild the recent history
//! of every text channel is walked and each valued reaction credited again.
//! Every reactor counts: a message with three upvoters earns three points.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bot::Bot;
use crate::ledger::ScoreLedger;
use crate::types::*;

/// Messages scanned per channel, newest first.
pub const MESSAGES_PER_CHANNEL: u8 = 50;

/// Credit `author_id` once per non-bot reactor. Returns how many counted.
pub fn tally_reactors(
    ledger: &mut ScoreLedger,
    author_id: &str,
    delta: i64,
    reactors: &[User],
) -> usize {
    let mut counted = 0;
    for reactor in reactors {
        if reactor.bot {
            continue;
        }
        ledger.credit(author_id, delta);
        counted += 1;
    }
    counted
}

/// Scan every text channel of a cached guild.
pub async fn scan_guild(bot: Arc<Bot>, guild_id: Snowflake) {
    let channels: Vec<(Snowflake, Option<String>)> = {
        let state = bot.state.lock().await;
        state
            .cache
            .text_channels(&guild_id)
            .into_iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect()
    };
    info!(guild_id = %guild_id, channels = channels.len(), "backfill started");

    let mut credited = 0;
    for (channel_id, name) in channels {
        match scan_channel(&bot, &channel_id).await {
            Ok(n) => credited += n,
            Err(e) if e.is_forbidden() => {
                debug!(channel_id = %channel_id, "no access to channel history")
            }
            Err(e) => warn!(
                channel = name.as_deref().unwrap_or("?"),
                channel_id = %channel_id,
                error = %e,
                "skipping channel during backfill"
            ),
        }
    }

    let scored_users = bot.state.lock().await.ledger.len();
    info!(guild_id = %guild_id, credited, scored_users, "backfill finished");
}

async fn scan_channel(bot: &Bot, channel_id: &str) -> Result<usize, crate::http::HttpError> {
    let messages = bot.http.get_messages(channel_id, MESSAGES_PER_CHANNEL).await?;

    let mut credited = 0;
    for message in &messages {
        for reaction in &message.reactions {
            let Some((key, delta)) = bot.table.value_of(&reaction.emoji) else {
                continue;
            };
            let users = bot
                .http
                .get_reaction_users(channel_id, &message.id, &reaction.emoji)
                .await?;

            let n = {
                let mut state = bot.state.lock().await;
                tally_reactors(&mut state.ledger, &message.author.id, delta, &users)
            };

            debug!(message_id = %message.id, emoji = %key, reactors = n, "backfilled reaction");
            credited += n;
        }
    }
    Ok(credited)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, bot: bool) -> User {
        User {
            id: id.to_string(),
            username: format!("user{}", id),
            discriminator: None,
            bot,
            global_name: None,
        }
    }

    // -- tally_reactors() --------------------------------------------------

    #[test]
    fn three_reactors_earn_three_times_the_delta() {
        let mut ledger = ScoreLedger::new();
        let reactors = [user("1", false), user("2", false), user("3", false)];
        assert_eq!(tally_reactors(&mut ledger, "author", 1, &reactors), 3);
        assert_eq!(ledger.get("author"), 3);
    }

    #[test]
    fn bot_reactors_are_skipped() {
        let mut ledger = ScoreLedger::new();
        let reactors = [user("1", false), user("99", true)];
        assert_eq!(tally_reactors(&mut ledger, "author", -10, &reactors), 1);
        assert_eq!(ledger.get("author"), -10);
    }

    #[test]
    fn no_reactors_leave_ledger_untouched() {
        let mut ledger = ScoreLedger::new();
        assert_eq!(tally_reactors(&mut ledger, "author", 1, &[]), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn backfill_adds_to_live_scores() {
        let mut ledger = ScoreLedger::new();
        ledger.credit("author", 5);
        tally_reactors(&mut ledger, "author", 10, &[user("1", false)]);
        assert_eq!(ledger.get("author"), 15);
    }
}
