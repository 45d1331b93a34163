//! Guild settings files and the tracked-pair repository.

use tempfile::TempDir;
use verifyq::config::guild::{GuildRegistry, GuildSettings};
use verifyq::model::{ChannelId, Emoji, GuildId, ResourceId, TrackedPair};

const GUILD: GuildId = GuildId(10);
const CHANNEL: ChannelId = ChannelId(20);

fn pair(channel: u64, resource: &str) -> TrackedPair {
    TrackedPair {
        guild: GUILD,
        channel: ChannelId(channel),
        resource: ResourceId::new(resource),
    }
}

#[tokio::test]
async fn track_is_idempotent_and_untrack_drops_empty_channels() {
    let registry = GuildRegistry::empty();

    assert!(registry.track(GUILD, CHANNEL, ResourceId::new("g1")).await);
    assert!(!registry.track(GUILD, CHANNEL, ResourceId::new("g1")).await);
    assert!(registry.track(GUILD, CHANNEL, ResourceId::new("g2")).await);
    assert_eq!(
        registry.tracked_pairs().await,
        vec![pair(20, "g1"), pair(20, "g2")]
    );

    assert!(!registry.untrack(GUILD, CHANNEL, &ResourceId::new("nope")).await);
    assert!(registry.untrack(GUILD, CHANNEL, &ResourceId::new("g1")).await);
    assert!(registry.untrack(GUILD, CHANNEL, &ResourceId::new("g2")).await);

    let settings = registry.settings(GUILD).await.unwrap();
    assert!(settings.tracked.is_empty());
    assert!(!registry.untrack(GuildId(99), CHANNEL, &ResourceId::new("g1")).await);
}

#[tokio::test]
async fn pairs_for_channel_filters_by_channel() {
    let registry = GuildRegistry::empty();
    registry.track(GUILD, ChannelId(1), ResourceId::new("a")).await;
    registry.track(GUILD, ChannelId(2), ResourceId::new("b")).await;
    registry.track(GUILD, ChannelId(2), ResourceId::new("c")).await;

    assert_eq!(
        registry.pairs_for_channel(GUILD, ChannelId(2)).await,
        vec![pair(2, "b"), pair(2, "c")]
    );
    assert!(registry.pairs_for_channel(GuildId(5), ChannelId(2)).await.is_empty());
}

#[tokio::test]
async fn settings_survive_save_and_load() {
    let dir = TempDir::new().unwrap();
    let registry = GuildRegistry::empty();
    registry.track(GUILD, CHANNEL, ResourceId::new("j1npme6p")).await;
    registry.set_claim_emoji(GUILD, Emoji::from("<:take:42>")).await;
    registry.set_unclaim_emoji(GUILD, Emoji::from("\u{1F6AB}")).await;
    registry.set_log_channel(GUILD, Some(ChannelId(77))).await;
    registry.track(GuildId(11), ChannelId(5), ResourceId::new("o1")).await;
    registry.save_to_dir(dir.path()).await.unwrap();

    assert!(dir.path().join("10.toml").exists());
    assert!(dir.path().join("11.toml").exists());

    let loaded = GuildRegistry::load_from_dir(dir.path()).unwrap();
    assert_eq!(loaded.settings(GUILD).await, registry.settings(GUILD).await);
    assert_eq!(loaded.guild_ids().await, vec![GUILD, GuildId(11)]);
    let markers = loaded.settings(GUILD).await.unwrap().markers();
    assert_eq!(markers.claim.as_str(), "<:take:42>");
}

#[test]
fn hand_written_file_loads() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("1234.toml"),
        r#"
guild_id = 1234
log_channel = 5678
spoilered_players = ["someone"]

[[tracked]]
channel = 9012
resources = ["j1npme6p", "o1y9wo6q"]
"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let registry = GuildRegistry::load_from_dir(dir.path()).unwrap();
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let settings: GuildSettings = rt
        .block_on(registry.settings(GuildId(1234)))
        .unwrap();
    assert_eq!(settings.log_channel, Some(ChannelId(5678)));
    assert_eq!(settings.claim_emoji.as_str(), "\u{2705}");
    assert_eq!(rt.block_on(registry.tracked_pairs()).len(), 2);
}

#[test]
fn missing_dir_is_empty_and_bad_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    assert!(GuildRegistry::load_from_dir(&missing).is_ok());

    std::fs::write(dir.path().join("1.toml"), "guild_id = \"not a number\"").unwrap();
    assert!(GuildRegistry::load_from_dir(dir.path()).is_err());
}

#[tokio::test]
async fn reload_picks_up_edits_and_survives_a_broken_file() {
    let dir = TempDir::new().unwrap();
    let running = GuildRegistry::empty();
    running.track(GUILD, CHANNEL, ResourceId::new("g1")).await;
    running.save_to_dir(dir.path()).await.unwrap();

    let operator = GuildRegistry::load_from_dir(dir.path()).unwrap();
    operator.track(GUILD, ChannelId(21), ResourceId::new("g2")).await;
    operator.set_log_channel(GUILD, Some(ChannelId(77))).await;
    operator.save_to_dir(dir.path()).await.unwrap();

    running.reload_from_dir(dir.path()).await.unwrap();
    assert_eq!(
        running.tracked_pairs().await,
        vec![pair(20, "g1"), pair(21, "g2")]
    );
    assert_eq!(running.settings(GUILD).await.unwrap().log_channel, Some(ChannelId(77)));

    std::fs::write(dir.path().join("99.toml"), "guild_id = \"not a number\"").unwrap();
    assert!(running.reload_from_dir(dir.path()).await.is_err());
    assert_eq!(running.tracked_pairs().await.len(), 2);
}
