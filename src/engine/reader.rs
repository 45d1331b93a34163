//! Rebuilds queue state from channel history.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chat::ChatApi;
use crate::codec;
use crate::error::ChatError;
use crate::model::{ChannelId, ChannelRecord, ChatMessage, ItemId};

/// Decoded queue messages of one resource in one channel.
#[derive(Debug, Clone, Default)]
pub struct ObservedChannel {
    /// One record per item, its most recent message, oldest first.
    pub records: Vec<ChannelRecord>,
    /// Older messages for items that also have a newer one.
    pub duplicates: Vec<ChatMessage>,
}

impl ObservedChannel {
    pub fn get(&self, item: &ItemId) -> Option<&ChannelRecord> {
        self.records.iter().find(|r| &r.item_id == item)
    }

    pub fn contains(&self, item: &ItemId) -> bool {
        self.get(item).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Scans the most recent `history_limit` messages of a channel.
///
/// Items whose message has scrolled past the window are not seen; the
/// reconciler will post them again.
#[derive(Clone)]
pub struct ChannelStateReader {
    chat: Arc<dyn ChatApi>,
    history_limit: usize,
}

impl ChannelStateReader {
    /// A zero limit is raised to one; an empty window would make every
    /// pending item look unposted on every pass.
    pub fn new(chat: Arc<dyn ChatApi>, history_limit: usize) -> Self {
        Self {
            chat,
            history_limit: history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Queue state for the resource named `resource_name`, assuming it is
    /// the only resource in the channel.
    pub async fn read(
        &self,
        channel: ChannelId,
        resource_name: &str,
    ) -> Result<ObservedChannel, ChatError> {
        self.read_among(channel, resource_name, &[]).await
    }

    /// Queue state for the resource named `resource_name`, where `neighbours`
    /// names the other resources tracked in the same channel.
    ///
    /// Messages from other accounts, messages that do not decode, and
    /// messages owned by a neighbour are skipped.
    pub async fn read_among(
        &self,
        channel: ChannelId,
        resource_name: &str,
        neighbours: &[String],
    ) -> Result<ObservedChannel, ChatError> {
        let bot = self.chat.bot_user();
        let history = self
            .chat
            .recent_messages(channel, self.history_limit)
            .await?;

        let mut latest: HashMap<ItemId, ChannelRecord> = HashMap::new();
        let mut duplicates = Vec::new();
        for message in history {
            if message.author != bot {
                continue;
            }
            let Some(decoded) = codec::decode(&message.content) else {
                continue;
            };
            if !decoded.belongs_among(resource_name, neighbours) {
                continue;
            }
            let record = ChannelRecord {
                item_id: decoded.item_id.clone(),
                state: decoded.state,
                message,
            };
            // History is oldest first, so a later message replaces an earlier one.
            if let Some(prev) = latest.insert(decoded.item_id, record) {
                duplicates.push(prev.message);
            }
        }

        let mut records: Vec<ChannelRecord> = latest.into_values().collect();
        records.sort_by_key(|r| r.message.id);
        duplicates.sort_by_key(|m| m.id);
        Ok(ObservedChannel {
            records,
            duplicates,
        })
    }
}
