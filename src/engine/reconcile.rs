//! One reconciliation pass for one tracked pair.
//!
//! The pass reads the pending set from the queue source and the observed
//! set from channel history, then:
//!
//! 1. posts a message for every pending item with none,
//! 2. deletes messages for items no longer pending (and older duplicates),
//! 3. re-reads the channel and adds the state's marker wherever it is missing.
//!
//! Nothing is held between passes. A pass interrupted half way leaves the
//! channel in a state the next pass diffs against like any other.

use opentelemetry::KeyValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Instrument, debug, info, warn};

use super::reader::ChannelStateReader;
use crate::chat::ChatApi;
use crate::codec;
use crate::config::guild::GuildSettings;
use crate::error::{ChatError, Result};
use crate::model::{ChannelId, ChatMessage, ClaimState, ItemId, ResourceId, TrackedPair};
use crate::source::QueueSource;
use crate::telemetry::{metrics, sync};

/// Chat writes made by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub posted: usize,
    pub retired: usize,
    pub marked: usize,
}

impl TickReport {
    pub fn is_noop(&self) -> bool {
        self.posted == 0 && self.retired == 0 && self.marked == 0
    }
}

#[derive(Clone)]
pub struct Reconciler {
    source: Arc<dyn QueueSource>,
    chat: Arc<dyn ChatApi>,
    reader: ChannelStateReader,
    /// Last known display name per resource, so a neighbour that fails to
    /// describe still keeps its messages.
    names: Arc<Mutex<HashMap<ResourceId, String>>>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn QueueSource>,
        chat: Arc<dyn ChatApi>,
        reader: ChannelStateReader,
    ) -> Self {
        Self {
            source,
            chat,
            reader,
            names: Arc::default(),
        }
    }

    /// Bring `pair`'s channel in line with the pending queue.
    ///
    /// Any source or chat failure aborts the pass with nothing rolled back.
    pub async fn reconcile(&self, pair: &TrackedPair, settings: &GuildSettings) -> Result<TickReport> {
        let span = sync::start_tick_span(pair);
        let report = self
            .reconcile_inner(pair, settings)
            .instrument(span.clone())
            .await?;
        span.record("sync.posted", report.posted);
        span.record("sync.retired", report.retired);
        span.record("sync.marked", report.marked);
        Ok(report)
    }

    async fn reconcile_inner(
        &self,
        pair: &TrackedPair,
        settings: &GuildSettings,
    ) -> Result<TickReport> {
        let mut report = TickReport::default();
        let resource = self.source.describe(&pair.resource).await?;
        self.remember(&pair.resource, &resource.name);
        let pending = self.source.list_pending(&pair.resource).await?;
        let neighbours = self.neighbour_names(pair, settings).await;
        let observed = self
            .reader
            .read_among(pair.channel, &resource.name, &neighbours.names)
            .await?;

        let expected: HashSet<&ItemId> = pending.iter().map(|i| &i.id).collect();

        // Post, in the order the source returned them. Messages past the
        // history window are invisible, so posting more than it holds would
        // repost the oldest ones on every pass.
        let kept = observed
            .records
            .iter()
            .filter(|r| expected.contains(&r.item_id))
            .count();
        let capacity = self.reader.history_limit().saturating_sub(kept);
        let mut posted: HashSet<&ItemId> = HashSet::new();
        for item in &pending {
            if observed.contains(&item.id) || posted.contains(&item.id) {
                continue;
            }
            if posted.len() >= capacity {
                warn!(
                    pending = pending.len(),
                    history_limit = self.reader.history_limit(),
                    "pending items exceed the history window, not posting the rest"
                );
                break;
            }
            posted.insert(&item.id);
            let spoiler = settings.is_spoilered(&item.players);
            let text = codec::encode(&resource.name, item, spoiler, &ClaimState::Unclaimed);
            let message = self.chat.send_message(pair.channel, &text).await?;
            debug!(item = %item.id, %message, "posted pending item");
            metrics::instruments().messages_posted.add(1, &[]);
            report.posted += 1;
        }

        if !neighbours.complete {
            debug!("a neighbouring resource has no known name, skipping retire");
            return self.remark(pair, settings, &resource.name, &neighbours.names, report).await;
        }

        // Retire.
        for record in &observed.records {
            if expected.contains(&record.item_id) {
                continue;
            }
            if self.retire(pair.channel, &record.message, "stale").await? {
                info!(item = %record.item_id, state = %record.state, "retired item no longer pending");
                report.retired += 1;
            }
        }
        for duplicate in &observed.duplicates {
            if self.retire(pair.channel, duplicate, "duplicate").await? {
                debug!(message = %duplicate.id, "retired duplicate message");
                report.retired += 1;
            }
        }

        self.remark(pair, settings, &resource.name, &neighbours.names, report).await
    }

    /// Re-mark. Only ever adds; removing a marker is a claim transition.
    async fn remark(
        &self,
        pair: &TrackedPair,
        settings: &GuildSettings,
        name: &str,
        neighbours: &[String],
        mut report: TickReport,
    ) -> Result<TickReport> {
        let markers = settings.markers();
        let current = self.reader.read_among(pair.channel, name, neighbours).await?;
        for record in &current.records {
            let marker = markers.for_state(&record.state);
            if record.message.has_reaction(marker) {
                continue;
            }
            let fresh = match self.chat.fetch_message(pair.channel, record.message.id).await {
                Ok(fresh) => fresh,
                Err(ChatError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if fresh.content != record.message.content || fresh.has_reaction(marker) {
                debug!(message = %record.message.id, "message changed since read, skipping marker");
                metrics::instruments().dropped_transitions.add(1, &[KeyValue::new("path", "remark")]);
                continue;
            }
            self.chat
                .add_reaction(pair.channel, record.message.id, marker)
                .await?;
            metrics::instruments().markers_added.add(1, &[]);
            report.marked += 1;
        }

        Ok(report)
    }

    /// Names of the other resources tracked in `pair`'s channel.
    ///
    /// Uses the last known name when describing a neighbour fails. The result
    /// is incomplete when a neighbour has never been described.
    async fn neighbour_names(&self, pair: &TrackedPair, settings: &GuildSettings) -> Neighbours {
        let mut neighbours = Neighbours {
            names: Vec::new(),
            complete: true,
        };
        let others = settings
            .tracked
            .iter()
            .filter(|t| t.channel == pair.channel)
            .flat_map(|t| t.resources.iter())
            .filter(|r| **r != pair.resource);
        for other in others {
            if let Some(name) = self.known_name(other) {
                neighbours.names.push(name);
                continue;
            }
            match self.source.describe(other).await {
                Ok(resource) => {
                    self.remember(other, &resource.name);
                    neighbours.names.push(resource.name);
                }
                Err(e) => {
                    debug!(neighbour = %other, error = %e, "could not name neighbouring resource");
                    neighbours.complete = false;
                }
            }
        }
        neighbours
    }

    fn known_name(&self, resource: &ResourceId) -> Option<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
    }

    fn remember(&self, resource: &ResourceId, name: &str) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.clone(), name.to_string());
    }

    /// Delete one message. `false` if someone else already deleted it.
    async fn retire(&self, channel: ChannelId, message: &ChatMessage, reason: &'static str) -> Result<bool> {
        match self.chat.delete_message(channel, message.id).await {
            Ok(()) => {
                metrics::instruments().messages_retired.add(1, &[KeyValue::new("reason", reason)]);
                Ok(true)
            }
            Err(ChatError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

struct Neighbours {
    names: Vec<String>,
    /// False when some neighbour's messages could not be told apart.
    complete: bool,
}
