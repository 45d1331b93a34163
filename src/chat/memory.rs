//! In-memory chat service for tests.
//!
//! Message ids come from one increasing counter so history order matches id
//! order. Every mutating call made through [`ChatApi`] is counted; the
//! `*_as` helpers used to stage human activity are not.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::ChatApi;
use crate::error::ChatError;
use crate::model::{ChannelId, ChatMessage, Emoji, MessageId, ReactionCount, UserId};

/// Mutating calls made through the [`ChatApi`] surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub sends: usize,
    pub edits: usize,
    pub deletes: usize,
    pub reactions_added: usize,
    pub reaction_clears: usize,
}

impl OpCounts {
    pub fn total(&self) -> usize {
        self.sends + self.edits + self.deletes + self.reactions_added + self.reaction_clears
    }
}

struct StoredMessage {
    id: MessageId,
    author: UserId,
    content: String,
    reactions: Vec<(Emoji, Vec<UserId>)>,
}

/// A content change applied behind the engine's back once a message has
/// been read a given number of times.
struct PendingEdit {
    channel: ChannelId,
    message: MessageId,
    reads_left: usize,
    content: String,
}

struct Inner {
    next_id: u64,
    channels: HashMap<ChannelId, Vec<StoredMessage>>,
    users: HashMap<UserId, String>,
    failing: HashSet<ChannelId>,
    pending_edits: Vec<PendingEdit>,
    ops: OpCounts,
}

pub struct MemoryChat {
    bot: UserId,
    inner: Mutex<Inner>,
}

impl MemoryChat {
    pub fn new(bot: UserId) -> Self {
        Self {
            bot,
            inner: Mutex::new(Inner {
                next_id: 1000,
                channels: HashMap::new(),
                users: HashMap::from([(bot, "verifyq".to_string())]),
                failing: HashSet::new(),
                pending_edits: Vec::new(),
                ops: OpCounts::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_user(&self, user: UserId, name: impl Into<String>) {
        self.lock().users.insert(user, name.into());
    }

    /// Post a message as any account without counting it as an engine call.
    pub fn post_as(&self, channel: ChannelId, author: UserId, content: &str) -> MessageId {
        self.lock().insert(channel, author, content)
    }

    /// React as any account without counting it as an engine call.
    pub fn react_as(&self, channel: ChannelId, message: MessageId, user: UserId, emoji: &Emoji) {
        if let Ok(stored) = self.lock().stored_mut(channel, message) {
            add_reactor(stored, user, emoji);
        }
    }

    /// Overwrite a message as if another client had edited it.
    pub fn set_content(&self, channel: ChannelId, message: MessageId, content: &str) {
        if let Ok(stored) = self.lock().stored_mut(channel, message) {
            stored.content = content.to_string();
        }
    }

    /// Replace a message's content right after it has been read `reads`
    /// more times, simulating a writer that lands between two engine calls.
    pub fn edit_after_reads(
        &self,
        channel: ChannelId,
        message: MessageId,
        reads: usize,
        content: &str,
    ) {
        self.lock().pending_edits.push(PendingEdit {
            channel,
            message,
            reads_left: reads,
            content: content.to_string(),
        });
    }

    /// Make every call touching `channel` fail transiently.
    pub fn set_failing(&self, channel: ChannelId, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(channel);
        } else {
            inner.failing.remove(&channel);
        }
    }

    /// Snapshot of a channel, oldest first.
    pub fn messages(&self, channel: ChannelId) -> Vec<ChatMessage> {
        let inner = self.lock();
        inner
            .channels
            .get(&channel)
            .map(|msgs| msgs.iter().map(|m| self.view(channel, m)).collect())
            .unwrap_or_default()
    }

    pub fn message(&self, channel: ChannelId, message: MessageId) -> Option<ChatMessage> {
        self.messages(channel).into_iter().find(|m| m.id == message)
    }

    pub fn ops(&self) -> OpCounts {
        self.lock().ops
    }

    pub fn reset_ops(&self) {
        self.lock().ops = OpCounts::default();
    }

    fn view(&self, channel: ChannelId, stored: &StoredMessage) -> ChatMessage {
        ChatMessage {
            id: stored.id,
            channel,
            author: stored.author,
            content: stored.content.clone(),
            reactions: stored
                .reactions
                .iter()
                .map(|(emoji, users)| ReactionCount {
                    emoji: emoji.clone(),
                    count: users.len() as u32,
                    me: users.contains(&self.bot),
                })
                .collect(),
        }
    }
}

impl Inner {
    fn insert(&mut self, channel: ChannelId, author: UserId, content: &str) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        self.channels.entry(channel).or_default().push(StoredMessage {
            id,
            author,
            content: content.to_string(),
            reactions: Vec::new(),
        });
        id
    }

    fn check(&self, channel: ChannelId) -> Result<(), ChatError> {
        if self.failing.contains(&channel) {
            return Err(ChatError::Transient(format!(
                "channel {channel}: simulated outage"
            )));
        }
        Ok(())
    }

    fn stored_mut(
        &mut self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<&mut StoredMessage, ChatError> {
        self.channels
            .get_mut(&channel)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.id == message))
            .ok_or_else(|| ChatError::NotFound(format!("message {message} in {channel}")))
    }

    /// Count one read of each message and apply edits that have come due.
    fn note_reads(&mut self, channel: ChannelId, read: &[MessageId]) {
        let mut due = Vec::new();
        self.pending_edits.retain_mut(|edit| {
            if edit.channel != channel || !read.contains(&edit.message) {
                return true;
            }
            edit.reads_left = edit.reads_left.saturating_sub(1);
            if edit.reads_left == 0 {
                due.push((edit.message, std::mem::take(&mut edit.content)));
                return false;
            }
            true
        });
        for (message, content) in due {
            if let Ok(stored) = self.stored_mut(channel, message) {
                stored.content = content;
            }
        }
    }
}

fn add_reactor(stored: &mut StoredMessage, user: UserId, emoji: &Emoji) {
    match stored.reactions.iter_mut().find(|(e, _)| e == emoji) {
        Some((_, users)) => {
            if !users.contains(&user) {
                users.push(user);
            }
        }
        None => stored.reactions.push((emoji.clone(), vec![user])),
    }
}

#[async_trait]
impl ChatApi for MemoryChat {
    fn bot_user(&self) -> UserId {
        self.bot
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        let all = inner.channels.get(&channel).map(Vec::as_slice).unwrap_or(&[]);
        let start = all.len().saturating_sub(limit);
        let window: Vec<ChatMessage> = all[start..].iter().map(|m| self.view(channel, m)).collect();
        let ids: Vec<MessageId> = window.iter().map(|m| m.id).collect();
        inner.note_reads(channel, &ids);
        Ok(window)
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<ChatMessage, ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        let view = {
            let stored = inner.stored_mut(channel, message)?;
            self.view(channel, stored)
        };
        inner.note_reads(channel, &[message]);
        Ok(view)
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        inner.ops.sends += 1;
        Ok(inner.insert(channel, self.bot, content))
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        inner.stored_mut(channel, message)?.content = content.to_string();
        inner.ops.edits += 1;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        let msgs = inner
            .channels
            .get_mut(&channel)
            .ok_or_else(|| ChatError::NotFound(format!("channel {channel}")))?;
        let before = msgs.len();
        msgs.retain(|m| m.id != message);
        if msgs.len() == before {
            return Err(ChatError::NotFound(format!("message {message} in {channel}")));
        }
        inner.ops.deletes += 1;
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        let bot = self.bot;
        add_reactor(inner.stored_mut(channel, message)?, bot, emoji);
        inner.ops.reactions_added += 1;
        Ok(())
    }

    async fn clear_reactions(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        inner.stored_mut(channel, message)?.reactions.clear();
        inner.ops.reaction_clears += 1;
        Ok(())
    }

    async fn reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<Vec<UserId>, ChatError> {
        let mut inner = self.lock();
        inner.check(channel)?;
        let stored = inner.stored_mut(channel, message)?;
        Ok(stored
            .reactions
            .iter()
            .find(|(e, _)| e == emoji)
            .map(|(_, users)| users.clone())
            .unwrap_or_default())
    }

    async fn user_name(&self, user: UserId) -> Result<String, ChatError> {
        self.lock()
            .users
            .get(&user)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("user {user}")))
    }
}
