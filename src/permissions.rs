//! Channel permission resolution.
//!
//! Implements Discord's documented algorithm: guild owner and
//! `ADMINISTRATOR` short-circuit to everything, otherwise the @everyone
//! role and member roles are OR-ed into a base set, then channel overwrites
//! are applied in order (@everyone, roles, member).

use bitflags::bitflags;

use crate::types::{Channel, Guild, OverwriteType};

bitflags! {
    /// The subset of Discord permission bits the bot cares about. Unknown
    /// bits are retained so round-tripping is lossless.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const ADMINISTRATOR = 1 << 3;
        const VIEW_CHANNEL = 1 << 10;
        const SEND_MESSAGES = 1 << 11;

        const _ = !0;
    }
}

impl Permissions {
    /// Parse the decimal-string encoding used on the wire. Garbage parses as
    /// no permissions.
    pub fn from_wire(raw: &str) -> Self {
        Self::from_bits_retain(raw.parse::<u64>().unwrap_or(0))
    }

    /// What the bot needs to post a message in a channel.
    pub fn can_send(self) -> bool {
        self.contains(Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES)
    }
}

/// Guild-level permissions of `member_roles` (the member's role ids).
pub fn base_permissions(guild: &Guild, user_id: &str, member_roles: &[String]) -> Permissions {
    if guild.owner_id.as_deref() == Some(user_id) {
        return Permissions::all();
    }

    // The @everyone role shares the guild's id.
    let mut perms = guild
        .roles
        .iter()
        .find(|r| r.id == guild.id)
        .map(|r| Permissions::from_wire(&r.permissions))
        .unwrap_or_else(Permissions::empty);

    for role in guild.roles.iter().filter(|r| member_roles.contains(&r.id)) {
        perms |= Permissions::from_wire(&role.permissions);
    }

    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }
    perms
}

/// Effective permissions of a member in `channel`.
pub fn channel_permissions(
    guild: &Guild,
    channel: &Channel,
    user_id: &str,
    member_roles: &[String],
) -> Permissions {
    let mut perms = base_permissions(guild, user_id, member_roles);
    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    let overwrites = &channel.permission_overwrites;

    if let Some(everyone) = overwrites.iter().find(|o| o.id == guild.id) {
        perms.remove(Permissions::from_wire(&everyone.deny));
        perms.insert(Permissions::from_wire(&everyone.allow));
    }

    let mut allow = Permissions::empty();
    let mut deny = Permissions::empty();
    for o in overwrites
        .iter()
        .filter(|o| o.kind == OverwriteType::Role && member_roles.contains(&o.id))
    {
        allow |= Permissions::from_wire(&o.allow);
        deny |= Permissions::from_wire(&o.deny);
    }
    perms.remove(deny);
    perms.insert(allow);

    if let Some(member) = overwrites
        .iter()
        .find(|o| o.kind == OverwriteType::Member && o.id == user_id)
    {
        perms.remove(Permissions::from_wire(&member.deny));
        perms.insert(Permissions::from_wire(&member.allow));
    }

    perms
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
