//! Guild state mirrored from gateway events.
//!
//! Kept deliberately small: the guilds we are in, their channels, roles and
//! whatever members arrived with `GUILD_CREATE` (always including the bot).

use std::collections::HashMap;

use crate::permissions::channel_permissions;
use crate::types::*;

#[derive(Debug, Default)]
pub struct GuildCache {
    guilds: HashMap<Snowflake, Guild>,
}

impl GuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_guild(&mut self, mut guild: Guild) {
        // GUILD_CREATE channels omit their guild_id.
        for channel in &mut guild.channels {
            channel.guild_id = Some(guild.id.clone());
        }
        self.guilds.insert(guild.id.clone(), guild);
    }

    pub fn remove_guild(&mut self, guild_id: &str) -> Option<Guild> {
        self.guilds.remove(guild_id)
    }

    pub fn guild(&self, guild_id: &str) -> Option<&Guild> {
        self.guilds.get(guild_id)
    }

    pub fn guilds(&self) -> impl Iterator<Item = &Guild> {
        self.guilds.values()
    }

    /// Insert or replace a channel in its guild. DM channels are ignored.
    pub fn upsert_channel(&mut self, channel: Channel) {
        let Some(guild) = channel
            .guild_id
            .as_deref()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        match guild.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel,
            None => guild.channels.push(channel),
        }
    }

    pub fn remove_channel(&mut self, channel: &Channel) {
        if let Some(guild) = channel
            .guild_id
            .as_deref()
            .and_then(|id| self.guilds.get_mut(id))
        {
            guild.channels.retain(|c| c.id != channel.id);
        }
    }

    /// Find a channel in any cached guild.
    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.guilds
            .values()
            .flat_map(|g| g.channels.iter())
            .find(|c| c.id == channel_id)
    }

    pub fn role<'a>(&'a self, guild_id: &str, role_id: &str) -> Option<&'a Role> {
        self.guild(guild_id)?.roles.iter().find(|r| r.id == role_id)
    }

    pub fn member<'a>(&'a self, guild_id: &str, user_id: &str) -> Option<&'a GuildMember> {
        self.guild(guild_id)?
            .members
            .iter()
            .find(|m| m.user.as_ref().is_some_and(|u| u.id == user_id))
    }

    /// Text channels of a guild, in the order the client shows them.
    pub fn text_channels<'a>(&'a self, guild_id: &str) -> Vec<&'a Channel> {
        let Some(guild) = self.guild(guild_id) else {
            return Vec::new();
        };
        let mut channels: Vec<&Channel> =
            guild.channels.iter().filter(|c| c.kind.is_text()).collect();
        channels.sort_by(|a, b| {
            a.position
                .unwrap_or(i32::MAX)
                .cmp(&b.position.unwrap_or(i32::MAX))
                .then_with(|| snowflake_order(&a.id, &b.id))
        });
        channels
    }

    /// First text channel where `user_id` may view and post.
    pub fn first_sendable_channel<'a>(
        &'a self,
        guild_id: &str,
        user_id: &str,
    ) -> Option<&'a Channel> {
        let guild = self.guild(guild_id)?;
        let roles = self
            .member(guild_id, user_id)
            .map(|m| m.roles.as_slice())
            .unwrap_or(&[]);
        self.text_channels(guild_id)
            .into_iter()
            .find(|c| channel_permissions(guild, c, user_id, roles).can_send())
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }
}

/// Snowflakes sort numerically; fall back to string order for junk ids.
fn snowflake_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
