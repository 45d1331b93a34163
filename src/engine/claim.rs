//! Reaction-driven claim transitions.
//!
//! ```text
//!            claim marker (any human)
//! Unclaimed ─────────────────────────▶ Claimed(by)
//!     ▲                                    │
//!     └────────────────────────────────────┘
//!          unclaim marker (claimant only)
//! ```
//!
//! The whole state lives in the message: the claim line in its text and the
//! single marker reaction. A transition edits the text, clears every
//! reaction and adds the marker for the new state.
//!
//! Before writing, the message is fetched again and compared with what the
//! decision was based on. If a reconciliation pass or another client got
//! there first the transition is dropped; the user can react again.

use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::{Instrument, debug, info};

use crate::chat::ChatApi;
use crate::codec;
use crate::config::guild::GuildRegistry;
use crate::error::{ChatError, Result};
use crate::event::ReactionAdded;
use crate::model::ClaimState;
use crate::telemetry::{metrics, sync};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { by: String },
    Unclaimed { by: String },
    /// The event did not call for a transition.
    Ignored(&'static str),
    /// The message changed between read and write.
    Dropped,
}

pub struct ClaimStateMachine {
    chat: Arc<dyn ChatApi>,
    registry: Arc<GuildRegistry>,
}

impl ClaimStateMachine {
    pub fn new(chat: Arc<dyn ChatApi>, registry: Arc<GuildRegistry>) -> Self {
        Self { chat, registry }
    }

    pub async fn handle(&self, event: &ReactionAdded) -> Result<ClaimOutcome> {
        let span = sync::start_claim_span(event);
        let outcome = self.handle_inner(event).instrument(span.clone()).await?;
        match &outcome {
            ClaimOutcome::Claimed { .. } => {
                sync::record_transition(&span, "unclaimed", "claimed");
                metrics::instruments().claim_transitions.add(1, &[KeyValue::new("kind", "claim")]);
            }
            ClaimOutcome::Unclaimed { .. } => {
                sync::record_transition(&span, "claimed", "unclaimed");
                metrics::instruments().claim_transitions.add(1, &[KeyValue::new("kind", "unclaim")]);
            }
            ClaimOutcome::Dropped => {
                metrics::instruments().dropped_transitions.add(1, &[KeyValue::new("path", "claim")]);
            }
            ClaimOutcome::Ignored(reason) => {
                span.in_scope(|| debug!(reason, "reaction ignored"));
            }
        }
        Ok(outcome)
    }

    async fn handle_inner(&self, event: &ReactionAdded) -> Result<ClaimOutcome> {
        let Some(settings) = self.registry.settings(event.guild).await else {
            return Ok(ClaimOutcome::Ignored("guild not configured"));
        };
        if !settings.is_tracked_channel(event.channel) {
            return Ok(ClaimOutcome::Ignored("channel not tracked"));
        }
        let bot = self.chat.bot_user();
        if event.user == bot {
            return Ok(ClaimOutcome::Ignored("own reaction"));
        }

        let markers = settings.markers();
        let claiming = if event.emoji == markers.claim {
            true
        } else if event.emoji == markers.unclaim {
            false
        } else {
            return Ok(ClaimOutcome::Ignored("not a marker"));
        };

        let message = match self.chat.fetch_message(event.channel, event.message).await {
            Ok(message) => message,
            Err(ChatError::NotFound(_)) => return Ok(ClaimOutcome::Ignored("message gone")),
            Err(e) => return Err(e.into()),
        };
        if message.author != bot {
            return Ok(ClaimOutcome::Ignored("not a queue message"));
        }
        let Some(decoded) = codec::decode(&message.content) else {
            return Ok(ClaimOutcome::Ignored("not a queue message"));
        };

        // The bot's own seeding reaction is not a request.
        let humans = self
            .chat
            .reactors(event.channel, event.message, &event.emoji)
            .await?
            .into_iter()
            .filter(|u| *u != bot)
            .count();
        if humans == 0 {
            return Ok(ClaimOutcome::Ignored("no human reactors"));
        }

        let name = self.chat.user_name(event.user).await?;
        let (rewritten, next) = if claiming {
            if decoded.state.is_claimed() {
                return Ok(ClaimOutcome::Ignored("already claimed"));
            }
            (
                codec::with_claim(&message.content, &name, event.at),
                ClaimState::claimed_by(name.clone(), event.at),
            )
        } else {
            match decoded.state.claimant() {
                None => return Ok(ClaimOutcome::Ignored("already unclaimed")),
                Some(claimant) if claimant != name => {
                    return Ok(ClaimOutcome::Ignored("not the claimant"));
                }
                Some(_) => (codec::without_claim(&message.content), ClaimState::Unclaimed),
            }
        };
        let Some(rewritten) = rewritten else {
            return Ok(ClaimOutcome::Ignored("not a queue message"));
        };

        let fresh = match self.chat.fetch_message(event.channel, event.message).await {
            Ok(fresh) => fresh,
            Err(ChatError::NotFound(_)) => return Ok(ClaimOutcome::Dropped),
            Err(e) => return Err(e.into()),
        };
        if fresh.content != message.content {
            debug!(message = %event.message, "message changed since read, dropping transition");
            return Ok(ClaimOutcome::Dropped);
        }

        self.chat
            .edit_message(event.channel, event.message, &rewritten)
            .await?;
        self.chat
            .clear_reactions(event.channel, event.message)
            .await?;
        self.chat
            .add_reaction(event.channel, event.message, markers.for_state(&next))
            .await?;

        info!(item = %decoded.item_id, user = %name, to = %next, "claim state changed");
        Ok(if claiming {
            ClaimOutcome::Claimed { by: name }
        } else {
            ClaimOutcome::Unclaimed { by: name }
        })
    }
}
