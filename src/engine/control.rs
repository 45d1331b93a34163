//! Scheduling loop: periodic reconciliation plus reaction events, on one task.

use opentelemetry::KeyValue;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::claim::ClaimStateMachine;
use super::reader::ChannelStateReader;
use super::reconcile::{Reconciler, TickReport};
use crate::chat::ChatApi;
use crate::config::guild::{GuildRegistry, GuildSettings};
use crate::error::{Error, SourceError};
use crate::event::Event;
use crate::model::TrackedPair;
use crate::source::QueueSource;
use crate::telemetry::metrics;

const EVENT_BUFFER: usize = 256;
const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the scheduling loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between reconciliation ticks.
    pub tick_interval: Duration,
    /// How many recent messages each channel scan covers.
    pub history_limit: usize,
    /// Directory of guild TOML files, re-read at the start of every tick so
    /// operator changes apply without a restart.
    pub guild_config_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            history_limit: 200,
            guild_config_dir: None,
        }
    }
}

impl SchedulerConfig {
    /// Raise values the loop cannot run with to their minimum.
    fn normalized(mut self) -> Self {
        if self.tick_interval < MIN_TICK_INTERVAL {
            warn!(
                requested_ms = self.tick_interval.as_millis() as u64,
                "tick interval too short, using {}s",
                MIN_TICK_INTERVAL.as_secs()
            );
            self.tick_interval = MIN_TICK_INTERVAL;
        }
        if self.history_limit == 0 {
            warn!("history limit of zero, scanning the latest message only");
            self.history_limit = 1;
        }
        self
    }
}

/// Totals for one tick across every tracked pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub pairs: usize,
    pub failed: usize,
    pub writes: TickReport,
}

/// Cloneable handle for feeding events to a running loop and stopping it.
#[derive(Clone)]
pub struct SchedulerHandle {
    events: mpsc::Sender<Event>,
    shutdown: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    /// Queue an event. `false` once the loop has stopped.
    pub async fn send(&self, event: Event) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Stop the loop. A tick already running is allowed to finish.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

enum Step {
    Shutdown,
    Event(Event),
    Tick,
}

/// Drives every tracked pair on a fixed interval and applies reaction
/// events in between.
///
/// Ticks never overlap and an event is never handled during a tick. A failing
/// pair is logged and skipped; the other pairs and the loop carry on.
pub struct SchedulingLoop {
    reconciler: Reconciler,
    claims: ClaimStateMachine,
    registry: Arc<GuildRegistry>,
    chat: Arc<dyn ChatApi>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    /// Pairs whose last tick failed authorization; the log channel has been
    /// told about each of them once.
    unauthorized: HashSet<TrackedPair>,
}

impl SchedulingLoop {
    pub fn new(
        source: Arc<dyn QueueSource>,
        chat: Arc<dyn ChatApi>,
        registry: Arc<GuildRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        let config = config.normalized();
        let reader = ChannelStateReader::new(Arc::clone(&chat), config.history_limit);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            reconciler: Reconciler::new(source, Arc::clone(&chat), reader),
            claims: ClaimStateMachine::new(Arc::clone(&chat), Arc::clone(&registry)),
            registry,
            chat,
            config,
            shutdown: Arc::new(Notify::new()),
            events_tx,
            events_rx,
            unauthorized: HashSet::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            events: self.events_tx.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Run until [`SchedulerHandle::shutdown`]. The first tick starts
    /// immediately.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            history_limit = self.config.history_limit,
            "scheduling loop started"
        );

        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.notified() => Step::Shutdown,
                Some(event) = self.events_rx.recv() => Step::Event(event),
                _ = interval.tick() => Step::Tick,
            };

            match step {
                Step::Shutdown => {
                    info!("scheduling loop shutting down");
                    return;
                }
                Step::Event(event) => self.handle_event(event).await,
                Step::Tick => {
                    self.tick().await;
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::ReactionAdded(reaction) => match self.claims.handle(&reaction).await {
                Ok(outcome) => debug!(?outcome, message = %reaction.message, "reaction handled"),
                Err(e) => warn!(message = %reaction.message, error = %e, "reaction handling failed"),
            },
            Event::SyncNow => {
                self.tick().await;
            }
        }
    }

    /// Reconcile every tracked pair once.
    pub async fn tick(&mut self) -> TickSummary {
        let started = Instant::now();
        let mut summary = TickSummary::default();

        if let Some(dir) = &self.config.guild_config_dir
            && let Err(e) = self.registry.reload_from_dir(dir).await
        {
            warn!(dir = %dir.display(), error = %e, "guild config reload failed, keeping previous settings");
        }
        let pairs = self.registry.tracked_pairs().await;
        self.unauthorized.retain(|p| pairs.contains(p));

        for pair in pairs {
            let Some(settings) = self.registry.settings(pair.guild).await else {
                continue;
            };
            summary.pairs += 1;

            match self.reconciler.reconcile(&pair, &settings).await {
                Ok(report) => {
                    if self.unauthorized.remove(&pair) {
                        info!(%pair, "authorization restored");
                    }
                    if report.is_noop() {
                        debug!(%pair, "pair in sync");
                    } else {
                        info!(
                            %pair,
                            posted = report.posted,
                            retired = report.retired,
                            marked = report.marked,
                            "pair reconciled"
                        );
                    }
                    summary.writes.posted += report.posted;
                    summary.writes.retired += report.retired;
                    summary.writes.marked += report.marked;
                }
                Err(Error::Source(e)) if e.is_unauthorized() => {
                    summary.failed += 1;
                    metrics::instruments().pair_tick_failures.add(1, &[KeyValue::new("kind", "unauthorized")]);
                    warn!(%pair, error = %e, "not authorized for resource, skipping pair");
                    if self.unauthorized.insert(pair.clone()) {
                        self.notify_unauthorized(&settings, &pair, &e).await;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    let kind = match &e {
                        Error::Source(_) => "transient",
                        Error::Chat(_) => "chat",
                        _ => "other",
                    };
                    metrics::instruments().pair_tick_failures.add(1, &[KeyValue::new("kind", kind)]);
                    warn!(%pair, error = %e, "pair tick failed, retrying next interval");
                }
            }
        }

        metrics::instruments().tick_duration_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        summary
    }

    async fn notify_unauthorized(
        &self,
        settings: &GuildSettings,
        pair: &TrackedPair,
        err: &SourceError,
    ) {
        let Some(log_channel) = settings.log_channel else {
            return;
        };
        let notice = format!(
            "verifyq: {err}. Resource `{}` tracked in <#{}> is skipped until access is restored.",
            pair.resource, pair.channel
        );
        if let Err(e) = self.chat.send_message(log_channel, &notice).await {
            error!(%pair, %log_channel, error = %e, "failed to post to log channel");
        }
    }
}
