//! Reconciler passes against in-memory collaborators.

use chrono::Utc;
use std::sync::Arc;
use verifyq::chat::{ChatApi, MemoryChat};
use verifyq::codec::{decode, encode, with_claim};
use verifyq::config::guild::{GuildSettings, TrackedChannel};
use verifyq::engine::{ChannelStateReader, Reconciler, TickReport};
use verifyq::error::Error;
use verifyq::model::*;
use verifyq::source::MemorySource;

const BOT: UserId = UserId(1);
const HUMAN: UserId = UserId(2);
const GUILD: GuildId = GuildId(10);
const CHANNEL: ChannelId = ChannelId(20);
const CLAIM: &str = "\u{2705}";
const UNCLAIM: &str = "\u{274C}";

fn item(id: &str) -> WorkItem {
    WorkItem {
        id: ItemId::new(id),
        category: "Any% - X".to_string(),
        duration_secs: 61.2,
        players: vec!["Foo".to_string()],
        url: format!("https://www.speedrun.com/game/run/{id}"),
    }
}

struct Fixture {
    source: Arc<MemorySource>,
    chat: Arc<MemoryChat>,
    reconciler: Reconciler,
    settings: GuildSettings,
    pair: TrackedPair,
}

impl Fixture {
    fn new() -> Self {
        Self::with_history_limit(200)
    }

    fn with_history_limit(limit: usize) -> Self {
        let source = Arc::new(MemorySource::new());
        source.add_resource("game1", "Game");
        let chat = Arc::new(MemoryChat::new(BOT));
        let dyn_chat: Arc<dyn ChatApi> = chat.clone();
        let reader = ChannelStateReader::new(Arc::clone(&dyn_chat), limit);
        let reconciler = Reconciler::new(source.clone(), dyn_chat, reader);
        Self {
            source,
            chat,
            reconciler,
            settings: GuildSettings::new(GUILD),
            pair: TrackedPair {
                guild: GUILD,
                channel: CHANNEL,
                resource: ResourceId::new("game1"),
            },
        }
    }

    fn set_pending(&self, ids: &[&str]) {
        self.source
            .set_pending(&self.pair.resource, ids.iter().map(|id| item(id)).collect());
    }

    async fn pass(&self) -> TickReport {
        self.reconciler
            .reconcile(&self.pair, &self.settings)
            .await
            .expect("pass should succeed")
    }

    fn queue_ids(&self) -> Vec<String> {
        self.chat
            .messages(CHANNEL)
            .iter()
            .filter_map(|m| decode(&m.content))
            .map(|d| d.item_id.to_string())
            .collect()
    }
}

fn assert_exactly_one_correct_marker(chat: &MemoryChat) {
    for msg in chat.messages(CHANNEL) {
        let Some(decoded) = decode(&msg.content) else {
            continue;
        };
        let claim = msg.has_reaction(&Emoji::from(CLAIM));
        let unclaim = msg.has_reaction(&Emoji::from(UNCLAIM));
        assert!(!(claim && unclaim), "message {} carries both markers", msg.id);
        match decoded.state {
            ClaimState::Unclaimed => assert!(claim, "unclaimed {} lacks claim marker", msg.id),
            ClaimState::Claimed { .. } => {
                assert!(unclaim, "claimed {} lacks unclaim marker", msg.id)
            }
        }
    }
}

#[tokio::test]
async fn posts_new_item_with_claim_marker() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);

    let report = fx.pass().await;

    assert_eq!(
        report,
        TickReport {
            posted: 1,
            retired: 0,
            marked: 1
        }
    );
    let messages = fx.chat.messages(CHANNEL);
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].content,
        "`Game: Any% - X` in 1:01.200 by Foo\n<https://www.speedrun.com/game/run/r1>"
    );
    assert_eq!(messages[0].reactions.len(), 1);
    assert_eq!(messages[0].reactions[0].emoji.as_str(), CLAIM);
    assert!(messages[0].reactions[0].me);
}

#[tokio::test]
async fn second_pass_writes_nothing() {
    let fx = Fixture::new();
    fx.set_pending(&["r1", "r2", "r3"]);
    fx.pass().await;
    fx.chat.reset_ops();

    let report = fx.pass().await;

    assert!(report.is_noop());
    assert_eq!(fx.chat.ops().total(), 0);
}

#[tokio::test]
async fn converges_in_source_order() {
    let fx = Fixture::new();
    fx.set_pending(&["r3", "r1", "r2"]);
    fx.pass().await;
    assert_eq!(fx.queue_ids(), vec!["r3", "r1", "r2"]);
    assert_exactly_one_correct_marker(&fx.chat);

    fx.set_pending(&["r1", "r4"]);
    let report = fx.pass().await;
    assert_eq!(report.posted, 1);
    assert_eq!(report.retired, 2);
    assert_eq!(fx.queue_ids(), vec!["r1", "r4"]);
    assert_exactly_one_correct_marker(&fx.chat);
}

#[tokio::test]
async fn retiring_a_claimed_item_discards_the_claim() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);
    fx.pass().await;
    let msg = &fx.chat.messages(CHANNEL)[0];
    let claimed = with_claim(&msg.content, "alice", Utc::now()).unwrap();
    fx.chat.set_content(CHANNEL, msg.id, &claimed);

    fx.set_pending(&[]);
    let report = fx.pass().await;

    assert_eq!(report.retired, 1);
    assert!(fx.chat.messages(CHANNEL).is_empty());
}

#[tokio::test]
async fn claimed_message_missing_its_marker_gets_unclaim_only() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);
    let text = encode(
        "Game",
        &item("r1"),
        false,
        &ClaimState::claimed_by("alice", Utc::now()),
    );
    fx.chat.post_as(CHANNEL, BOT, &text);

    let report = fx.pass().await;

    assert_eq!(report.posted, 0);
    assert_eq!(report.marked, 1);
    let msg = &fx.chat.messages(CHANNEL)[0];
    assert!(msg.has_reaction(&Emoji::from(UNCLAIM)));
    assert!(!msg.has_reaction(&Emoji::from(CLAIM)));
}

#[tokio::test]
async fn chatter_and_other_resources_are_left_alone() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);
    let chatter = fx.chat.post_as(CHANNEL, HUMAN, "anyone verifying today?");
    let other = fx
        .chat
        .post_as(CHANNEL, BOT, &encode("Other Game", &item("x9"), false, &ClaimState::Unclaimed));
    let forged = fx
        .chat
        .post_as(CHANNEL, HUMAN, &encode("Game", &item("r9"), false, &ClaimState::Unclaimed));

    fx.pass().await;

    assert_eq!(fx.chat.message(CHANNEL, chatter).unwrap().reactions.len(), 0);
    assert_eq!(fx.chat.message(CHANNEL, other).unwrap().reactions.len(), 0);
    assert!(fx.chat.message(CHANNEL, forged).is_some());
    assert_eq!(fx.chat.messages(CHANNEL).len(), 4);
}

#[tokio::test]
async fn duplicate_messages_collapse_to_newest() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);
    let text = encode("Game", &item("r1"), false, &ClaimState::Unclaimed);
    fx.chat.post_as(CHANNEL, BOT, &text);
    let newest = fx.chat.post_as(CHANNEL, BOT, &text);

    let report = fx.pass().await;

    assert_eq!(report.posted, 0);
    assert_eq!(report.retired, 1);
    let messages = fx.chat.messages(CHANNEL);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, newest);
    assert_exactly_one_correct_marker(&fx.chat);
}

#[tokio::test]
async fn pending_list_duplicates_are_posted_once() {
    let fx = Fixture::new();
    fx.set_pending(&["r1", "r1"]);
    let report = fx.pass().await;
    assert_eq!(report.posted, 1);
}

#[tokio::test]
async fn transient_source_failure_leaves_channel_untouched() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);
    fx.source.set_failing(&fx.pair.resource, true);

    let err = fx
        .reconciler
        .reconcile(&fx.pair, &fx.settings)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Source(ref e) if !e.is_unauthorized()));
    assert_eq!(fx.chat.ops().total(), 0);

    fx.source.set_failing(&fx.pair.resource, false);
    assert_eq!(fx.pass().await.posted, 1);
}

#[tokio::test]
async fn unauthorized_is_reported_distinctly() {
    let fx = Fixture::new();
    fx.source.set_unauthorized(&fx.pair.resource, true);

    let err = fx
        .reconciler
        .reconcile(&fx.pair, &fx.settings)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Source(ref e) if e.is_unauthorized()));
}

#[tokio::test]
async fn chat_outage_aborts_the_pass() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);
    fx.chat.set_failing(CHANNEL, true);

    let err = fx
        .reconciler
        .reconcile(&fx.pair, &fx.settings)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Chat(_)));
}

#[tokio::test]
async fn remark_skips_message_edited_after_rescan() {
    let fx = Fixture::new();
    fx.set_pending(&["r1"]);
    let text = encode("Game", &item("r1"), false, &ClaimState::Unclaimed);
    let id = fx.chat.post_as(CHANNEL, BOT, &text);
    // Read once by the diff, once by the re-scan; the edit lands just before
    // the guard fetch.
    let claimed = with_claim(&text, "alice", Utc::now()).unwrap();
    fx.chat.edit_after_reads(CHANNEL, id, 2, &claimed);

    let report = fx.pass().await;

    assert_eq!(report.marked, 0);
    assert_eq!(fx.chat.ops().reactions_added, 0);

    // The next pass sees the claim and marks it accordingly.
    let report = fx.pass().await;
    assert_eq!(report.marked, 1);
    assert_exactly_one_correct_marker(&fx.chat);
}

#[tokio::test]
async fn custom_markers_are_used() {
    let mut fx = Fixture::new();
    fx.settings.claim_emoji = Emoji::from("<:take:123>");
    fx.set_pending(&["r1"]);

    fx.pass().await;

    let msg = &fx.chat.messages(CHANNEL)[0];
    assert!(msg.has_reaction(&Emoji::from("<:take:123>")));
}

#[tokio::test]
async fn spoilered_players_are_wrapped() {
    let mut fx = Fixture::new();
    fx.settings.spoilered_players.push("foo".to_string());
    fx.set_pending(&["r1"]);

    fx.pass().await;

    let msg = &fx.chat.messages(CHANNEL)[0];
    assert!(msg.content.contains("by ||Foo||\n"));
    assert_eq!(decode(&msg.content).unwrap().item_id.as_str(), "r1");
}

/// Tracks "Hollow Knight" and "Hollow Knight: Silksong" in the fixture channel.
fn share_channel_with_prefix_names(fx: &mut Fixture) -> (TrackedPair, TrackedPair) {
    fx.source.add_resource("hk", "Hollow Knight");
    fx.source.add_resource("silksong", "Hollow Knight: Silksong");
    let hk = TrackedPair {
        guild: GUILD,
        channel: CHANNEL,
        resource: ResourceId::new("hk"),
    };
    let silksong = TrackedPair {
        resource: ResourceId::new("silksong"),
        ..hk.clone()
    };
    fx.settings.tracked.push(TrackedChannel {
        channel: CHANNEL,
        resources: vec![hk.resource.clone(), silksong.resource.clone()],
    });
    (hk, silksong)
}

#[tokio::test]
async fn prefix_named_neighbours_converge_and_keep_claims() {
    let mut fx = Fixture::new();
    let (hk, silksong) = share_channel_with_prefix_names(&mut fx);
    fx.source.set_pending(&hk.resource, vec![item("a1")]);
    fx.source.set_pending(&silksong.resource, vec![item("b1")]);

    let first_hk = fx.reconciler.reconcile(&hk, &fx.settings).await.unwrap();
    let first_ss = fx.reconciler.reconcile(&silksong, &fx.settings).await.unwrap();
    assert_eq!((first_hk.posted, first_hk.retired), (1, 0));
    assert_eq!((first_ss.posted, first_ss.retired), (1, 0));

    let b1 = fx
        .chat
        .messages(CHANNEL)
        .into_iter()
        .find(|m| decode(&m.content).is_some_and(|d| d.item_id.as_str() == "b1"))
        .unwrap();
    let claimed = with_claim(&b1.content, "alice", Utc::now()).unwrap();
    fx.chat.set_content(CHANNEL, b1.id, &claimed);
    fx.chat.clear_reactions(CHANNEL, b1.id).await.unwrap();

    for _ in 0..2 {
        let a = fx.reconciler.reconcile(&hk, &fx.settings).await.unwrap();
        let b = fx.reconciler.reconcile(&silksong, &fx.settings).await.unwrap();
        assert_eq!((a.posted, a.retired), (0, 0));
        assert_eq!((b.posted, b.retired), (0, 0));
    }

    assert_eq!(fx.chat.ops().deletes, 0);
    let b1 = fx.chat.message(CHANNEL, b1.id).unwrap();
    assert_eq!(b1.content, claimed);
    assert_eq!(fx.queue_ids(), vec!["a1", "b1"]);
    assert_exactly_one_correct_marker(&fx.chat);

    let settled_hk = fx.reconciler.reconcile(&hk, &fx.settings).await.unwrap();
    let settled_ss = fx.reconciler.reconcile(&silksong, &fx.settings).await.unwrap();
    assert!(settled_hk.is_noop() && settled_ss.is_noop());
}

#[tokio::test]
async fn unnamed_neighbour_blocks_retiring() {
    let mut fx = Fixture::new();
    let (hk, silksong) = share_channel_with_prefix_names(&mut fx);
    fx.source.set_pending(&hk.resource, vec![item("a1")]);
    let b1 = fx.chat.post_as(
        CHANNEL,
        BOT,
        &encode("Hollow Knight: Silksong", &item("b1"), false, &ClaimState::Unclaimed),
    );
    fx.source.set_unauthorized(&silksong.resource, true);

    let report = fx.reconciler.reconcile(&hk, &fx.settings).await.unwrap();

    assert_eq!(report.posted, 1);
    assert_eq!(report.retired, 0);
    assert!(fx.chat.message(CHANNEL, b1).is_some());
}

#[tokio::test]
async fn known_neighbour_name_survives_a_failing_describe() {
    let mut fx = Fixture::new();
    let (hk, silksong) = share_channel_with_prefix_names(&mut fx);
    fx.source.set_pending(&hk.resource, vec![item("a1")]);
    fx.source.set_pending(&silksong.resource, vec![item("b1")]);
    fx.reconciler.reconcile(&silksong, &fx.settings).await.unwrap();
    fx.source.set_unauthorized(&silksong.resource, true);

    fx.source.set_pending(&hk.resource, vec![]);
    fx.chat.post_as(
        CHANNEL,
        BOT,
        &encode("Hollow Knight", &item("a9"), false, &ClaimState::Unclaimed),
    );
    let report = fx.reconciler.reconcile(&hk, &fx.settings).await.unwrap();

    assert_eq!(report.retired, 1);
    assert_eq!(fx.queue_ids(), vec!["b1"]);
}

#[tokio::test]
async fn posting_stops_at_the_history_window() {
    let fx = Fixture::with_history_limit(2);
    fx.set_pending(&["r1", "r2", "r3"]);

    assert_eq!(fx.pass().await.posted, 2);
    assert_eq!(fx.pass().await.posted, 0);
    assert_eq!(fx.queue_ids(), vec!["r1", "r2"]);

    fx.set_pending(&["r2", "r3"]);
    let report = fx.pass().await;
    assert_eq!((report.posted, report.retired), (1, 1));
    assert_eq!(fx.queue_ids(), vec!["r2", "r3"]);
}

#[tokio::test]
async fn zero_history_limit_does_not_repost() {
    let fx = Fixture::with_history_limit(0);
    fx.set_pending(&["r1"]);

    for _ in 0..3 {
        fx.pass().await;
    }

    assert_eq!(fx.chat.messages(CHANNEL).len(), 1);
}
