//! Event handlers for the Discord bot.
//!
//! Each public function in this module handles one category of gateway event.
//! Handlers receive the shared [`Bot`]; they lock its state only for short
//! synchronous sections and never across a REST call.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{debug, error, info, warn};

use crate::backfill;
use crate::bot::{Bot, BotState};
use crate::commands::{self, slash_commands};
use crate::ledger::{ResetOutcome, ScoreLedger};
use crate::reactions::ReactionTable;
use crate::types::*;

// ---------------------------------------------------------------------------
// READY handler
// ---------------------------------------------------------------------------

/// Store identity and register slash commands (once per session).
pub async fn on_ready(bot: &Arc<Bot>, ready: ReadyEvent) {
    info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "bot is ready!");

    let app_id = ready.application.id;
    let already_registered = {
        let mut state = bot.state.lock().await;
        state.bot_user_id = Some(ready.user.id);
        state.application_id = Some(app_id.clone());
        state.commands_registered
    };
    if already_registered {
        return;
    }

    let cmds = slash_commands();
    let result = match bot.config.command_guild_id.as_deref() {
        Some(guild_id) => bot
            .http
            .bulk_overwrite_guild_commands(&app_id, guild_id, &cmds)
            .await
            .map(|r| (r.len(), Some(guild_id))),
        None => bot
            .http
            .bulk_overwrite_global_commands(&app_id, &cmds)
            .await
            .map(|r| (r.len(), None)),
    };

    match result {
        Ok((count, guild_id)) => {
            info!(count, guild_id = ?guild_id, "registered slash commands");
            bot.state.lock().await.commands_registered = true;
        }
        Err(e) => warn!(error = %e, "failed to register slash commands"),
    }
}

// ---------------------------------------------------------------------------
// GUILD_CREATE handler
// ---------------------------------------------------------------------------

/// Cache the guild and, the first time we see it, scan its history.
pub async fn on_guild_create(bot: &Arc<Bot>, guild: Guild) {
    let guild_id = guild.id.clone();
    info!(
        guild = %guild.name,
        guild_id = %guild_id,
        channels = guild.channels.len(),
        "guild available"
    );

    let first_seen = {
        let mut state = bot.state.lock().await;
        state.cache.insert_guild(guild);
        debug!(cached_guilds = state.cache.len(), "guild cached");
        state.backfilled.insert(guild_id.clone())
    };

    if first_seen {
        tokio::spawn(backfill::scan_guild(bot.clone(), guild_id));
    }
}

// ---------------------------------------------------------------------------
// MESSAGE_REACTION_ADD handler
// ---------------------------------------------------------------------------

/// Credit a message author for a reaction, if the emoji carries a value.
/// Returns the author's new score.
pub fn credit_reaction(
    ledger: &mut ScoreLedger,
    table: &ReactionTable,
    author_id: &str,
    emoji: &Emoji,
) -> Option<i64> {
    let (_, delta) = table.value_of(emoji)?;
    Some(ledger.credit(author_id, delta))
}

/// A reaction counts when its emoji carries a value and someone other than
/// the bot added it.
fn accepts_reaction(state: &BotState, table: &ReactionTable, reaction: &ReactionAdd) -> bool {
    !table_miss(table, &reaction.emoji) && !state.is_self(&reaction.user_id)
}

pub async fn on_reaction_add(bot: &Arc<Bot>, reaction: ReactionAdd) {
    let cached_channel = {
        let state = bot.state.lock().await;
        if !accepts_reaction(&state, &bot.table, &reaction) {
            return;
        }
        state.cache.channel(&reaction.channel_id).map(|c| c.id.clone())
    };

    let channel_id = match cached_channel {
        Some(id) => id,
        None => match bot.http.get_channel(&reaction.channel_id).await {
            Ok(channel) => channel.id,
            Err(e) => {
                debug!(
                    channel_id = %reaction.channel_id,
                    error = %e,
                    "reaction channel unavailable"
                );
                return;
            }
        },
    };

    let message = match bot.http.get_message(&channel_id, &reaction.message_id).await {
        Ok(m) => m,
        Err(e) if e.is_not_found() => {
            debug!(message_id = %reaction.message_id, "reacted message was deleted");
            return;
        }
        Err(e) => {
            debug!(message_id = %reaction.message_id, error = %e, "reacted message unavailable");
            return;
        }
    };

    let mut state = bot.state.lock().await;
    if let Some(score) =
        credit_reaction(&mut state.ledger, &bot.table, &message.author.id, &reaction.emoji)
    {
        debug!(
            author = %message.author.id,
            reactor = %reaction.user_id,
            score,
            "reaction credited"
        );
    }
}

fn table_miss(table: &ReactionTable, emoji: &Emoji) -> bool {
    table.value_of(emoji).is_none()
}

// ---------------------------------------------------------------------------
// INTERACTION_CREATE handler
// ---------------------------------------------------------------------------

pub async fn on_interaction(bot: &Arc<Bot>, interaction: Interaction) {
    if interaction.kind == InteractionType::Ping {
        let pong = InteractionResponse {
            kind: InteractionCallbackType::Pong,
            data: None,
        };
        if let Err(e) = bot
            .http
            .create_interaction_response(&interaction.id, &interaction.token, &pong)
            .await
        {
            warn!(error = %e, "failed to answer ping");
        }
        return;
    }
    if interaction.kind != InteractionType::ApplicationCommand {
        return;
    }

    let Some(name) = interaction.data.as_ref().and_then(|d| d.name.clone()) else {
        return;
    };
    let Some(user) = interaction.author().cloned() else {
        warn!(command = %name, "interaction without a user");
        return;
    };
    info!(command = %name, user = %user.id, "handling slash command");

    let result = match name.as_str() {
        "value" => cmd_value(bot, &interaction, &user).await,
        "reset" => cmd_reset(bot, &interaction, &user).await,
        "corememories" => cmd_corememories(bot, &interaction).await,
        "sethost" => cmd_sethost(bot, &interaction).await,
        other => {
            debug!(command = other, "unknown command");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(command = %name, error = %e, "failed to respond to command");
    }
}

type CommandResult = Result<(), crate::http::HttpError>;

async fn respond(
    bot: &Bot,
    interaction: &Interaction,
    resp: &InteractionResponse,
) -> CommandResult {
    bot.http
        .create_interaction_response(&interaction.id, &interaction.token, resp)
        .await
}

async fn cmd_value(bot: &Bot, interaction: &Interaction, user: &User) -> CommandResult {
    let value = bot.state.lock().await.ledger.get(&user.id);
    respond(bot, interaction, &commands::text_response(commands::value_text(user, value))).await
}

async fn cmd_reset(bot: &Bot, interaction: &Interaction, user: &User) -> CommandResult {
    let outcome = bot.state.lock().await.ledger.try_reset(&user.id, Utc::now());

    match outcome {
        ResetOutcome::Cooldown { remaining } => {
            let text = commands::cooldown_text(user, remaining);
            respond(bot, interaction, &commands::text_response(text)).await
        }
        ResetOutcome::Reset => {
            info!(user = %user.id, "value reset");
            let text = commands::reset_text(user);
            match tokio::fs::read(&bot.config.card_image).await {
                Ok(card) => {
                    bot.http
                        .create_interaction_response_with_file(
                            &interaction.id,
                            &interaction.token,
                            &commands::card_response(text),
                            commands::CARD_FILENAME,
                            card,
                        )
                        .await
                }
                Err(e) => {
                    warn!(
                        path = %bot.config.card_image.display(),
                        error = %e,
                        "card image unreadable, replying without it"
                    );
                    respond(bot, interaction, &commands::text_response(text)).await
                }
            }
        }
    }
}

async fn cmd_corememories(bot: &Bot, interaction: &Interaction) -> CommandResult {
    // Host resolution may need a REST round-trip; acknowledge first.
    respond(bot, interaction, &commands::deferred_response()).await?;

    let now = Utc::now();
    let host = bot.state.lock().await.store.host().map(str::to_string);
    let member = match (&host, interaction.guild_id.as_deref()) {
        (Some(raw), Some(guild_id)) => resolve_member(bot, guild_id, raw).await,
        _ => None,
    };
    let host_name = commands::host_display(host.as_deref(), member.as_deref());

    let msg = CreateMessage::new().content(commands::corememories_text(now, &host_name));
    bot.http
        .create_followup_message(&interaction.application_id, &interaction.token, &msg)
        .await?;
    debug!(month = now.month(), host = %host_name, "sent event announcement");
    Ok(())
}

/// Id of the guild member `raw` refers to, if it names one.
async fn resolve_member(bot: &Bot, guild_id: &str, raw: &str) -> Option<String> {
    let user_id = commands::parse_user_id(raw)?;
    if bot.state.lock().await.cache.member(guild_id, user_id).is_some() {
        return Some(user_id.to_string());
    }
    match bot.http.get_guild_member(guild_id, user_id).await {
        Ok(_) => Some(user_id.to_string()),
        Err(e) => {
            debug!(user_id, error = %e, "host is not a guild member");
            None
        }
    }
}

async fn cmd_sethost(bot: &Bot, interaction: &Interaction) -> CommandResult {
    if !commands::may_set_host(interaction.member.as_ref(), &bot.config.host_role_id) {
        return respond(bot, interaction, &commands::ephemeral_response(commands::SETHOST_DENIED))
            .await;
    }

    let Some(host) = interaction
        .data
        .as_ref()
        .and_then(|d| d.string_option("host"))
        .map(str::trim)
        .filter(|h| !h.is_empty())
    else {
        return respond(bot, interaction, &commands::ephemeral_response(commands::SETHOST_MISSING))
            .await;
    };

    let saved = bot.state.lock().await.store.set_host(host);
    match saved {
        Ok(()) => {
            info!(host, "event host updated");
            respond(bot, interaction, &commands::text_response(commands::sethost_text(host))).await
        }
        Err(e) => {
            error!(error = %e, "failed to persist host");
            respond(bot, interaction, &commands::ephemeral_response(commands::SETHOST_FAILED)).await
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactions::EmojiKey;
    use crate::store::HostStore;
    use crate::test_support::{self, HOST_ROLE};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    const UPVOTE: &str = "1419153448498106398";

    fn custom(id: &str) -> Emoji {
        Emoji {
            id: Some(id.to_string()),
            name: Some("vote".to_string()),
            animated: false,
        }
    }

    fn unicode(text: &str) -> Emoji {
        Emoji {
            id: None,
            name: Some(text.to_string()),
            animated: false,
        }
    }

    // -- credit_reaction() -------------------------------------------------

    #[test]
    fn upvote_and_heavy_downvote_accumulate() {
        let table = ReactionTable::default();
        let mut ledger = ScoreLedger::new();
        assert_eq!(
            credit_reaction(&mut ledger, &table, "a", &custom("1419153448498106398")),
            Some(1)
        );
        assert_eq!(
            credit_reaction(&mut ledger, &table, "a", &custom("1419156381000269874")),
            Some(-9)
        );
        assert_eq!(ledger.get("a"), -9);
    }

    #[test]
    fn unknown_emoji_changes_nothing() {
        let table = ReactionTable::default();
        let mut ledger = ScoreLedger::new();
        assert_eq!(credit_reaction(&mut ledger, &table, "a", &unicode("👍")), None);
        assert_eq!(credit_reaction(&mut ledger, &table, "a", &custom("5")), None);
        assert!(ledger.is_empty());
    }

    #[test]
    fn standard_emoji_in_custom_table() {
        let table = ReactionTable::new([(EmojiKey::Standard("⭐".to_string()), 2)]);
        let mut ledger = ScoreLedger::new();
        assert_eq!(credit_reaction(&mut ledger, &table, "a", &unicode("⭐")), Some(2));
        assert!(!table_miss(&table, &unicode("⭐")));
        assert!(table_miss(&table, &unicode("👍")));
    }

    // -- accepts_reaction() ------------------------------------------------

    fn reaction(user_id: &str, emoji: Emoji) -> ReactionAdd {
        ReactionAdd {
            user_id: user_id.to_string(),
            channel_id: "10".to_string(),
            message_id: "20".to_string(),
            guild_id: Some("100".to_string()),
            member: None,
            emoji,
        }
    }

    fn state() -> (tempfile::TempDir, BotState) {
        let dir = tempfile::tempdir().unwrap();
        let mut state = BotState::new(HostStore::load(dir.path().join("data.json")).unwrap());
        state.bot_user_id = Some("999".to_string());
        (dir, state)
    }

    #[test]
    fn member_reaction_with_valued_emoji_is_accepted() {
        let (_dir, state) = state();
        let table = ReactionTable::default();
        assert!(accepts_reaction(&state, &table, &reaction("1", custom(UPVOTE))));
    }

    #[test]
    fn bot_own_reaction_is_ignored() {
        let (_dir, state) = state();
        let table = ReactionTable::default();
        assert!(!accepts_reaction(&state, &table, &reaction("999", custom(UPVOTE))));
    }

    #[test]
    fn unvalued_emoji_is_ignored() {
        let (_dir, state) = state();
        let table = ReactionTable::default();
        assert!(!accepts_reaction(&state, &table, &reaction("1", unicode("👍"))));
    }

    // -- cmd_sethost() -----------------------------------------------------

    fn sethost(roles: &[&str], host: &str) -> Interaction {
        serde_json::from_value(json!({
            "id": "900", "application_id": "1", "type": 2, "token": "tok",
            "guild_id": "100", "channel_id": "10",
            "member": { "user": { "id": "1", "username": "u" }, "roles": roles },
            "data": {
                "id": "2", "name": "sethost",
                "options": [{ "name": "host", "type": 3, "value": host }],
            },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn sethost_without_the_role_is_refused_and_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut calls) = test_support::callback_routes();
        let bot = test_support::bot(dir.path(), &test_support::serve_api(router).await);

        on_interaction(&bot, sethost(&["3"], "<@5>")).await;

        let (id, body) = calls.recv().await.unwrap();
        assert_eq!(id, "900");
        assert_eq!(body["data"]["content"], commands::SETHOST_DENIED);
        assert_eq!(body["data"]["flags"], 64);
        assert!(bot.state.lock().await.store.host().is_none());
        assert!(!dir.path().join("data.json").exists());
    }

    #[tokio::test]
    async fn sethost_with_the_role_saves_the_host() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut calls) = test_support::callback_routes();
        let bot = test_support::bot(dir.path(), &test_support::serve_api(router).await);

        on_interaction(&bot, sethost(&["3", HOST_ROLE], " <@5> ")).await;

        let (_, body) = calls.recv().await.unwrap();
        assert_eq!(body["data"]["content"], commands::sethost_text("<@5>"));
        assert!(body["data"].get("flags").is_none());
        assert_eq!(bot.state.lock().await.store.host(), Some("<@5>"));

        let reloaded = HostStore::load(dir.path().join("data.json")).unwrap();
        assert_eq!(reloaded.host(), Some("<@5>"));
    }

    #[tokio::test]
    async fn sethost_with_blank_host_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut calls) = test_support::callback_routes();
        let bot = test_support::bot(dir.path(), &test_support::serve_api(router).await);

        on_interaction(&bot, sethost(&[HOST_ROLE], "   ")).await;

        let (_, body) = calls.recv().await.unwrap();
        assert_eq!(body["data"]["content"], commands::SETHOST_MISSING);
        assert_eq!(body["data"]["flags"], 64);
        assert!(bot.state.lock().await.store.host().is_none());
    }

    // -- resolve_member() --------------------------------------------------

    /// Only user 5 is a member according to the REST API.
    async fn members_api() -> String {
        let router = Router::new().route(
            "/api/v10/guilds/:guild_id/members/:user_id",
            get(|Path((_, user_id)): Path<(String, String)>| async move {
                if user_id == "5" {
                    Ok(Json(json!({ "user": { "id": "5", "username": "five" }, "roles": [] })))
                } else {
                    Err(StatusCode::NOT_FOUND)
                }
            }),
        );
        test_support::serve_api(router).await
    }

    async fn bot_with_cached_member(dir: &std::path::Path) -> Arc<Bot> {
        let bot = test_support::bot(dir, &members_api().await);
        let guild: Guild = serde_json::from_value(json!({
            "id": "100", "name": "g",
            "members": [{ "user": { "id": "7", "username": "seven" }, "roles": [] }],
        }))
        .unwrap();
        bot.state.lock().await.cache.insert_guild(guild);
        bot
    }

    #[tokio::test]
    async fn cached_member_resolves_without_rest() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with_cached_member(dir.path()).await;
        // The API would answer 404 for user 7.
        assert_eq!(resolve_member(&bot, "100", "<@7>").await.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn uncached_member_resolves_through_rest() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with_cached_member(dir.path()).await;
        assert_eq!(resolve_member(&bot, "100", "<@!5>").await.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn unknown_or_malformed_host_does_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with_cached_member(dir.path()).await;
        assert_eq!(resolve_member(&bot, "100", "6").await, None);
        assert_eq!(resolve_member(&bot, "100", "alice").await, None);
    }
}
