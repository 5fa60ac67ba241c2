//! Slash command definitions and the text they reply with.
//!
//! Nothing here touches the network; the handlers in [`crate::handlers`] call
//! these to build their responses.

use chrono::{DateTime, Duration, Utc};

use crate::ledger::format_remaining;
use crate::schedule;
use crate::types::*;

/// Option type for a string argument.
const OPTION_STRING: u8 = 3;

/// Filename the reset card is uploaded under.
pub const CARD_FILENAME: &str = "card.png";

/// The commands this bot registers.
pub fn slash_commands() -> Vec<ApplicationCommand> {
    vec![
        ApplicationCommand::chat_input("value", "Check your current value"),
        ApplicationCommand::chat_input("reset", "Reset your value to 0 (once every 14 days)"),
        ApplicationCommand::chat_input("corememories", "Show this month's Core Memories event"),
        ApplicationCommand::chat_input("sethost", "Set the host for this month's Core Memories")
            .option(ApplicationCommandOption {
                name: "host".to_string(),
                description: "The user hosting the event".to_string(),
                kind: OPTION_STRING,
                required: true,
            }),
    ]
}

// ---------------------------------------------------------------------------
// Reply text
// ---------------------------------------------------------------------------

pub fn value_text(user: &User, value: i64) -> String {
    format!("{}, your current value is **{}**", user.mention(), value)
}

pub fn cooldown_text(user: &User, remaining: Duration) -> String {
    format!(
        "{}, you can reset again in {}.",
        user.mention(),
        format_remaining(remaining)
    )
}

pub fn reset_text(user: &User) -> String {
    format!("{}, your value has been reset to **0** ✅", user.mention())
}

pub const SETHOST_DENIED: &str = "❌ You do not have permission to set the host.";
pub const SETHOST_MISSING: &str = "❌ Missing host.";
pub const SETHOST_FAILED: &str = "❌ Could not save the host, please try again.";

/// Only members holding the host role may change the host. Interactions
/// outside a guild carry no member and are refused.
pub fn may_set_host(member: Option<&GuildMember>, host_role_id: &str) -> bool {
    member.is_some_and(|m| m.has_role(host_role_id))
}

pub fn sethost_text(host: &str) -> String {
    format!("✅ Core Memories host has been set to **{}**", host)
}

/// Event announcement for the month containing `now`.
pub fn corememories_text(now: DateTime<Utc>, host: &str) -> String {
    format!(
        "📅 **{} Core Memories Wrapped**\n🗓 When: {}\n🙋 Host: {}",
        schedule::month_name(now),
        schedule::format_event_when(schedule::event_date(now)),
        host
    )
}

pub fn reminder_text(role: &Role) -> String {
    format!(
        "⏰ {}, it's time to set the next Core Memories host and create the new channel!",
        role.mention()
    )
}

// ---------------------------------------------------------------------------
// Host identifiers
// ---------------------------------------------------------------------------

/// User id inside a stored host string: a bare id, `<@id>` or `<@!id>`.
pub fn parse_user_id(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix("<@")
        .and_then(|s| s.strip_suffix('>'))
        .map(|s| s.strip_prefix('!').unwrap_or(s))
        .unwrap_or(raw);
    (!inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit())).then_some(inner)
}

/// How the stored host is shown. `member` is the id it resolved to in the
/// guild, if any.
pub fn host_display(host: Option<&str>, member: Option<&str>) -> String {
    match (host, member) {
        (None, _) => "Not set yet".to_string(),
        (Some(_), Some(id)) => format!("<@{}>", id),
        (Some(raw), None) => format!("<{}>", raw),
    }
}

// ---------------------------------------------------------------------------
// Interaction responses
// ---------------------------------------------------------------------------

pub fn text_response(content: impl Into<String>) -> InteractionResponse {
    InteractionResponse {
        kind: InteractionCallbackType::ChannelMessageWithSource,
        data: Some(InteractionCallbackData {
            content: Some(content.into()),
            ..Default::default()
        }),
    }
}

pub fn ephemeral_response(content: impl Into<String>) -> InteractionResponse {
    let mut resp = text_response(content);
    if let Some(data) = resp.data.as_mut() {
        data.flags = Some(EPHEMERAL);
    }
    resp
}

/// Message response whose body references the uploaded card as `files[0]`.
pub fn card_response(content: impl Into<String>) -> InteractionResponse {
    let mut resp = text_response(content);
    if let Some(data) = resp.data.as_mut() {
        data.attachments = Some(vec![AttachmentRef {
            id: 0,
            filename: CARD_FILENAME.to_string(),
        }]);
    }
    resp
}

pub fn deferred_response() -> InteractionResponse {
    InteractionResponse {
        kind: InteractionCallbackType::DeferredChannelMessageWithSource,
        data: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
