//! Emoji identity and the reaction value table.

use std::collections::HashMap;
use std::fmt;

use crate::types::Emoji;

/// Identity of a reaction emoji as used for scoring.
///
/// Custom guild emoji are keyed by their numeric id (their name can be
/// renamed freely); standard emoji by their literal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EmojiKey {
    Custom(u64),
    Standard(String),
}

impl EmojiKey {
    /// Normalise a wire emoji. Returns `None` for payloads carrying neither a
    /// usable id nor a name.
    pub fn from_emoji(emoji: &Emoji) -> Option<Self> {
        match (&emoji.id, &emoji.name) {
            (Some(id), _) => id.parse().ok().map(EmojiKey::Custom),
            (None, Some(name)) => Some(EmojiKey::Standard(name.clone())),
            (None, None) => None,
        }
    }
}

impl fmt::Display for EmojiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmojiKey::Custom(id) => write!(f, "custom:{}", id),
            EmojiKey::Standard(text) => f.write_str(text),
        }
    }
}

/// Immutable emoji -> point delta mapping, fixed at startup.
#[derive(Debug, Clone)]
pub struct ReactionTable {
    values: HashMap<EmojiKey, i64>,
}

impl ReactionTable {
    pub fn new(entries: impl IntoIterator<Item = (EmojiKey, i64)>) -> Self {
        Self {
            values: entries.into_iter().collect(),
        }
    }

    pub fn value(&self, key: &EmojiKey) -> Option<i64> {
        self.values.get(key).copied()
    }

    /// Look up a wire emoji directly.
    pub fn value_of(&self, emoji: &Emoji) -> Option<(EmojiKey, i64)> {
        let key = EmojiKey::from_emoji(emoji)?;
        let delta = self.value(&key)?;
        Some((key, delta))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for ReactionTable {
    /// The community's upvote / downvote emoji and their heavy variants.
    fn default() -> Self {
        Self::new([
            (EmojiKey::Custom(1419153448498106398), 1),
            (EmojiKey::Custom(1419153477015306251), -1),
            (EmojiKey::Custom(1419156407902802002), 10),
            (EmojiKey::Custom(1419156381000269874), -10),
        ])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
