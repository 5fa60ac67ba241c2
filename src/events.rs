//! Typed gateway events.
//!
//! Instead of matching on raw `(op, t, serde_json::Value)` tuples everywhere,
//! the gateway module deserialises dispatch payloads into this enum so the rest
//! of the bot can pattern-match on strongly-typed data.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We have identified or resumed; the bot is ready.
    Ready(ReadyEvent),

    /// Full guild object lazily sent after READY (or on join).
    GuildCreate(Guild),

    /// We left the guild, or it became unavailable.
    GuildDelete(UnavailableGuild),

    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),

    /// A single user added a single reaction to a message.
    ReactionAdd(ReactionAdd),

    /// An interaction was created (slash command, button, ...).
    InteractionCreate(Interaction),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). The inner bool indicates whether
    /// the session is resumable (`true`) or we must re-identify (`false`).
    InvalidSession(bool),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

// ---------------------------------------------------------------------------
// Parsing from a raw GatewayPayload
// ---------------------------------------------------------------------------

impl GatewayEvent {
    /// Try to convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails: unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
                data: payload.d,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let (Some(name), Some(d)) = (event_name.as_deref(), data.as_ref()) else {
            return GatewayEvent::Unknown {
                event_name,
                op: 0,
                data,
            };
        };

        let parsed = match name {
            "READY" => parse(name, d, GatewayEvent::Ready),
            "GUILD_CREATE" => parse(name, d, GatewayEvent::GuildCreate),
            "GUILD_DELETE" => parse(name, d, GatewayEvent::GuildDelete),
            "CHANNEL_CREATE" => parse(name, d, GatewayEvent::ChannelCreate),
            "CHANNEL_UPDATE" => parse(name, d, GatewayEvent::ChannelUpdate),
            "CHANNEL_DELETE" => parse(name, d, GatewayEvent::ChannelDelete),
            "MESSAGE_REACTION_ADD" => parse(name, d, GatewayEvent::ReactionAdd),
            "INTERACTION_CREATE" => parse(name, d, GatewayEvent::InteractionCreate),
            _ => None,
        };

        parsed.unwrap_or(GatewayEvent::Unknown {
            event_name,
            op: 0,
            data,
        })
    }

    /// Dispatch name for logging.
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::GuildCreate(_) => "GUILD_CREATE",
            GatewayEvent::GuildDelete(_) => "GUILD_DELETE",
            GatewayEvent::ChannelCreate(_) => "CHANNEL_CREATE",
            GatewayEvent::ChannelUpdate(_) => "CHANNEL_UPDATE",
            GatewayEvent::ChannelDelete(_) => "CHANNEL_DELETE",
            GatewayEvent::ReactionAdd(_) => "MESSAGE_REACTION_ADD",
            GatewayEvent::InteractionCreate(_) => "INTERACTION_CREATE",
            GatewayEvent::HeartbeatAck => "HEARTBEAT_ACK",
            GatewayEvent::HeartbeatRequest => "HEARTBEAT",
            GatewayEvent::Reconnect => "RECONNECT",
            GatewayEvent::InvalidSession(_) => "INVALID_SESSION",
            GatewayEvent::Unknown { event_name, .. } => event_name.as_deref().unwrap_or("?"),
        }
    }
}

/// Deserialise `d` into `T` and wrap it, warning on malformed payloads.
fn parse<T, F>(name: &str, d: &serde_json::Value, wrap: F) -> Option<GatewayEvent>
where
    T: DeserializeOwned,
    F: FnOnce(T) -> GatewayEvent,
{
    match T::deserialize(d) {
        Ok(value) => Some(wrap(value)),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
