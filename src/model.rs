//! Core data model.
//!
//! A work item is one pending run submission on the remote queue. It is
//! mirrored into a chat channel as one bot message whose text and reactions
//! carry the claim state; nothing else is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Chat identifiers
// ---------------------------------------------------------------------------

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

snowflake!(
    /// A chat server (guild).
    GuildId
);
snowflake!(
    /// A text channel.
    ChannelId
);
snowflake!(
    /// A message. Ids grow with creation time, so ordering by id is
    /// ordering by age.
    MessageId
);
snowflake!(
    /// A chat user account, bots included.
    UserId
);

// ---------------------------------------------------------------------------
// Remote queue
// ---------------------------------------------------------------------------

/// Identifier of a tracked resource (a game on the run-tracking service).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A resource's id together with the display name used as the message
/// prefix. The name is what separates co-located resources in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
}

/// Identifier of a pending work item. Immutable; identity of the item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One pending, unverified run.
///
/// The last path segment of `url` is the item id; the message codec relies
/// on this to recover identity from the posted link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    /// Category label, already joined with level and subcategory names.
    pub category: String,
    /// Primary time in seconds.
    pub duration_secs: f64,
    /// Player display names, in submission order.
    pub players: Vec<String>,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Who is working an item. Lives only in the message text.
///
/// `at` has whole-second precision once it has been through the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClaimState {
    Unclaimed,
    Claimed { by: String, at: DateTime<Utc> },
}

impl ClaimState {
    pub fn claimed_by(by: impl Into<String>, at: DateTime<Utc>) -> Self {
        ClaimState::Claimed { by: by.into(), at }
    }

    pub fn claimant(&self) -> Option<&str> {
        match self {
            ClaimState::Unclaimed => None,
            ClaimState::Claimed { by, .. } => Some(by),
        }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimState::Claimed { .. })
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimState::Unclaimed => f.write_str("unclaimed"),
            ClaimState::Claimed { .. } => f.write_str("claimed"),
        }
    }
}

/// A reaction emoji in its canonical string form: the unicode sequence
/// itself, or `<:name:id>` (`<a:name:id>` when animated) for custom emoji.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Emoji(pub String);

impl Emoji {
    pub const DEFAULT_CLAIM: &'static str = "\u{2705}";
    pub const DEFAULT_UNCLAIM: &'static str = "\u{274C}";

    pub fn new(emoji: impl Into<String>) -> Self {
        Self(emoji.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Emoji {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The guild's two reserved reactions.
///
/// A live, reconciled message carries exactly one of them: `claim` while
/// unclaimed (react to take it), `unclaim` while claimed (react to give it
/// back).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub claim: Emoji,
    pub unclaim: Emoji,
}

impl Markers {
    /// The marker a message in `state` should carry.
    pub fn for_state(&self, state: &ClaimState) -> &Emoji {
        match state {
            ClaimState::Unclaimed => &self.claim,
            ClaimState::Claimed { .. } => &self.unclaim,
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            claim: Emoji::new(Emoji::DEFAULT_CLAIM),
            unclaim: Emoji::new(Emoji::DEFAULT_UNCLAIM),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracking and chat state
// ---------------------------------------------------------------------------

/// A (channel, resource) binding kept in sync by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackedPair {
    pub guild: GuildId,
    pub channel: ChannelId,
    pub resource: ResourceId,
}

impl fmt::Display for TrackedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.guild, self.channel, self.resource)
    }
}

/// Aggregate of one emoji's reactions on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionCount {
    pub emoji: Emoji,
    pub count: u32,
    /// Whether the bot account is among the reactors.
    pub me: bool,
}

/// A message as read back from channel history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel: ChannelId,
    pub author: UserId,
    pub content: String,
    pub reactions: Vec<ReactionCount>,
}

impl ChatMessage {
    pub fn has_reaction(&self, emoji: &Emoji) -> bool {
        self.reactions
            .iter()
            .any(|r| &r.emoji == emoji && r.count > 0)
    }
}

/// Decoded view of one queue message, rebuilt every tick from history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub message: ChatMessage,
    pub item_id: ItemId,
    pub state: ClaimState,
}
