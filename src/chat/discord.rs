//! Discord adapter over serenity.
//!
//! [`DiscordChat`] implements [`ChatApi`] with serenity's HTTP client.
//! [`Gateway`] connects to the gateway and forwards reaction events to the
//! scheduling loop as [`Event::ReactionAdded`].

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serenity::all::{Context, EventHandler, GatewayIntents, Reaction, Ready, ShardManager};
use serenity::builder::{CreateMessage, EditMessage, GetMessages};
use serenity::http::{Http, HttpError};
use serenity::model::channel::{Message, ReactionType};
use serenity::model::id::{self as sid, EmojiId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ChatApi;
use crate::error::ChatError;
use crate::event::{Event, ReactionAdded};
use crate::model::{
    ChannelId, ChatMessage, Emoji, GuildId, MessageId, ReactionCount, UserId,
};

/// Discord returns at most this many messages or reactors per request.
const PAGE: u8 = 100;

pub struct DiscordChat {
    http: Arc<Http>,
    bot: UserId,
}

impl DiscordChat {
    /// Resolve the bot account behind `token`.
    pub async fn connect(token: &SecretString) -> Result<Self, ChatError> {
        let http = Arc::new(Http::new(token.expose_secret()));
        let me = http.get_current_user().await.map_err(map_err)?;
        info!(user = %me.name, id = %me.id, "discord http client ready");
        Ok(Self {
            http,
            bot: UserId(me.id.get()),
        })
    }
}

#[async_trait]
impl ChatApi for DiscordChat {
    fn bot_user(&self) -> UserId {
        self.bot
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let id = sid::ChannelId::new(channel.get());
        let mut out: Vec<ChatMessage> = Vec::with_capacity(limit);
        let mut before: Option<sid::MessageId> = None;

        // Pages come newest first.
        while out.len() < limit {
            let want = (limit - out.len()).min(PAGE as usize) as u8;
            let mut query = GetMessages::new().limit(want);
            if let Some(before) = before {
                query = query.before(before);
            }
            let page = id.messages(self.http.as_ref(), query).await.map_err(map_err)?;
            let Some(oldest) = page.last() else {
                break;
            };
            before = Some(oldest.id);
            let exhausted = page.len() < want as usize;
            out.extend(page.iter().map(to_chat_message));
            if exhausted {
                break;
            }
        }

        out.reverse();
        Ok(out)
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<ChatMessage, ChatError> {
        let msg = sid::ChannelId::new(channel.get())
            .message(self.http.as_ref(), sid::MessageId::new(message.get()))
            .await
            .map_err(map_err)?;
        Ok(to_chat_message(&msg))
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, ChatError> {
        let msg = sid::ChannelId::new(channel.get())
            .send_message(self.http.as_ref(), CreateMessage::new().content(content))
            .await
            .map_err(map_err)?;
        Ok(MessageId(msg.id.get()))
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), ChatError> {
        sid::ChannelId::new(channel.get())
            .edit_message(
                self.http.as_ref(),
                sid::MessageId::new(message.get()),
                EditMessage::new().content(content),
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), ChatError> {
        sid::ChannelId::new(channel.get())
            .delete_message(self.http.as_ref(), sid::MessageId::new(message.get()))
            .await
            .map_err(map_err)
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<(), ChatError> {
        self.http
            .create_reaction(
                sid::ChannelId::new(channel.get()),
                sid::MessageId::new(message.get()),
                &to_reaction_type(emoji),
            )
            .await
            .map_err(map_err)
    }

    async fn clear_reactions(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), ChatError> {
        self.http
            .delete_message_reactions(
                sid::ChannelId::new(channel.get()),
                sid::MessageId::new(message.get()),
            )
            .await
            .map_err(map_err)
    }

    async fn reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<Vec<UserId>, ChatError> {
        let channel = sid::ChannelId::new(channel.get());
        let message = sid::MessageId::new(message.get());
        let reaction = to_reaction_type(emoji);
        let mut users = Vec::new();
        let mut after: Option<sid::UserId> = None;
        loop {
            let page = channel
                .reaction_users(
                    self.http.as_ref(),
                    message,
                    reaction.clone(),
                    Some(PAGE),
                    after,
                )
                .await
                .map_err(map_err)?;
            let full = page.len() == PAGE as usize;
            after = page.last().map(|u| u.id);
            users.extend(page.iter().map(|u| UserId(u.id.get())));
            if !full {
                break;
            }
        }
        Ok(users)
    }

    async fn user_name(&self, user: UserId) -> Result<String, ChatError> {
        let user = self
            .http
            .get_user(sid::UserId::new(user.get()))
            .await
            .map_err(map_err)?;
        Ok(user.name)
    }
}

fn map_err(err: serenity::Error) -> ChatError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err {
        match response.status_code.as_u16() {
            404 => return ChatError::NotFound(response.error.message.clone()),
            403 => return ChatError::Forbidden(response.error.message.clone()),
            _ => {}
        }
    }
    ChatError::Transient(err.to_string())
}

fn to_chat_message(msg: &Message) -> ChatMessage {
    ChatMessage {
        id: MessageId(msg.id.get()),
        channel: ChannelId(msg.channel_id.get()),
        author: UserId(msg.author.id.get()),
        content: msg.content.clone(),
        reactions: msg
            .reactions
            .iter()
            .map(|r| ReactionCount {
                emoji: to_emoji(&r.reaction_type),
                count: u32::try_from(r.count).unwrap_or(u32::MAX),
                me: r.me,
            })
            .collect(),
    }
}

/// Canonical string form: the unicode sequence, or `<:name:id>`.
pub fn to_emoji(reaction: &ReactionType) -> Emoji {
    match reaction {
        ReactionType::Custom { animated, id, name } => Emoji::new(format!(
            "<{}:{}:{}>",
            if *animated { "a" } else { "" },
            name.as_deref().unwrap_or_default(),
            id
        )),
        ReactionType::Unicode(s) => Emoji::new(s.clone()),
        other => Emoji::new(other.to_string()),
    }
}

/// Inverse of [`to_emoji`]. Anything that is not a custom emoji reference
/// is sent as unicode.
pub fn to_reaction_type(emoji: &Emoji) -> ReactionType {
    let s = emoji.as_str();
    if let Some(inner) = s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        let (animated, rest) = match inner.strip_prefix("a:") {
            Some(rest) => (true, rest),
            None => (false, inner.strip_prefix(':').unwrap_or(inner)),
        };
        if let Some((name, id)) = rest.rsplit_once(':')
            && let Ok(id) = id.parse::<u64>()
        {
            return ReactionType::Custom {
                animated,
                id: EmojiId::new(id),
                name: Some(name.to_string()),
            };
        }
    }
    ReactionType::Unicode(s.to_string())
}

struct Handler {
    events: mpsc::Sender<Event>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "gateway connected");
    }

    async fn reaction_add(&self, _ctx: Context, reaction: Reaction) {
        let (Some(guild), Some(user)) = (reaction.guild_id, reaction.user_id) else {
            return;
        };
        let event = Event::ReactionAdded(ReactionAdded {
            guild: GuildId(guild.get()),
            channel: ChannelId(reaction.channel_id.get()),
            message: MessageId(reaction.message_id.get()),
            user: UserId(user.get()),
            emoji: to_emoji(&reaction.emoji),
            at: Utc::now(),
        });
        debug!(?event, "forwarding reaction");
        if self.events.send(event).await.is_err() {
            warn!("scheduling loop has stopped, dropping reaction");
        }
    }
}

/// Gateway connection delivering reaction events.
pub struct Gateway {
    client: serenity::Client,
}

impl Gateway {
    pub async fn connect(
        token: &SecretString,
        events: mpsc::Sender<Event>,
    ) -> Result<Self, ChatError> {
        let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGE_REACTIONS;
        let client = serenity::Client::builder(token.expose_secret(), intents)
            .event_handler(Handler { events })
            .await
            .map_err(map_err)?;
        Ok(Self { client })
    }

    pub fn shard_manager(&self) -> Arc<ShardManager> {
        Arc::clone(&self.client.shard_manager)
    }

    /// Run until the shard manager is shut down.
    pub async fn start(mut self) -> Result<(), ChatError> {
        self.client.start().await.map_err(map_err)
    }
}
