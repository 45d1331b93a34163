//! Chat service primitives.
//!
//! The engine treats the chat channel as its only store: messages are rows,
//! reactions are the claim markers. Everything it needs from the chat
//! service goes through [`ChatApi`].

#[cfg(feature = "discord")]
pub mod discord;
pub mod memory;

pub use memory::{MemoryChat, OpCounts};

use async_trait::async_trait;

use crate::error::ChatError;
use crate::model::{ChannelId, ChatMessage, Emoji, MessageId, UserId};

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// The account the engine posts and reacts as.
    fn bot_user(&self) -> UserId;

    /// The most recent `limit` messages of a channel, oldest first.
    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<ChatMessage, ChatError>;

    async fn send_message(&self, channel: ChannelId, content: &str)
    -> Result<MessageId, ChatError>;

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), ChatError>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId)
    -> Result<(), ChatError>;

    /// React as the bot account.
    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<(), ChatError>;

    /// Remove every reaction from a message.
    async fn clear_reactions(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), ChatError>;

    /// Everyone who reacted with `emoji`, the bot included.
    async fn reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<Vec<UserId>, ChatError>;

    /// Account name used to record and check claims.
    async fn user_name(&self, user: UserId) -> Result<String, ChatError>;
}
