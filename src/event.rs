//! Typed events delivered to the scheduling loop.
//!
//! Gateway callbacks never touch chat state themselves; they turn what they
//! saw into an [`Event`] and send it down the scheduler's channel, so every
//! mutation happens on the loop's single task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ChannelId, Emoji, GuildId, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Someone added a reaction to a message in a guild channel.
    ReactionAdded(ReactionAdded),
    /// Run a reconciliation pass now instead of waiting for the interval.
    SyncNow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionAdded {
    pub guild: GuildId,
    pub channel: ChannelId,
    pub message: MessageId,
    pub user: UserId,
    pub emoji: Emoji,
    /// When the reaction was observed; recorded in the claim line.
    pub at: DateTime<Utc>,
}
