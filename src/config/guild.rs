//! Per-guild settings and the tracked-pair repository.
//!
//! Each guild is one TOML file, `<dir>/<guild_id>.toml`. Operator commands
//! edit the files; a running scheduler re-reads them at every tick.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{ChannelId, Emoji, GuildId, Markers, ResourceId, TrackedPair};

/// One channel and the resources mirrored into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedChannel {
    pub channel: ChannelId,
    #[serde(default)]
    pub resources: Vec<ResourceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: GuildId,
    /// Operator-visible channel for notices such as lost authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_channel: Option<ChannelId>,
    #[serde(default = "default_claim_emoji")]
    pub claim_emoji: Emoji,
    #[serde(default = "default_unclaim_emoji")]
    pub unclaim_emoji: Emoji,
    /// Lowercased player names whose runs are posted behind spoiler tags.
    #[serde(default)]
    pub spoilered_players: Vec<String>,
    #[serde(default)]
    pub tracked: Vec<TrackedChannel>,
}

fn default_claim_emoji() -> Emoji {
    Emoji::new(Emoji::DEFAULT_CLAIM)
}

fn default_unclaim_emoji() -> Emoji {
    Emoji::new(Emoji::DEFAULT_UNCLAIM)
}

impl GuildSettings {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            log_channel: None,
            claim_emoji: default_claim_emoji(),
            unclaim_emoji: default_unclaim_emoji(),
            spoilered_players: Vec::new(),
            tracked: Vec::new(),
        }
    }

    pub fn markers(&self) -> Markers {
        Markers {
            claim: self.claim_emoji.clone(),
            unclaim: self.unclaim_emoji.clone(),
        }
    }

    /// Whether any of `players` is on the spoiler list. Case-insensitive.
    pub fn is_spoilered(&self, players: &[String]) -> bool {
        players.iter().any(|p| {
            let p = p.to_lowercase();
            self.spoilered_players.iter().any(|s| s.to_lowercase() == p)
        })
    }

    pub fn is_tracked_channel(&self, channel: ChannelId) -> bool {
        self.tracked.iter().any(|t| t.channel == channel)
    }

    pub fn pairs(&self) -> impl Iterator<Item = TrackedPair> + '_ {
        self.tracked.iter().flat_map(move |t| {
            t.resources.iter().map(move |resource| TrackedPair {
                guild: self.guild_id,
                channel: t.channel,
                resource: resource.clone(),
            })
        })
    }
}

/// Keyed repository of every guild's settings.
#[derive(Debug, Default)]
pub struct GuildRegistry {
    guilds: RwLock<BTreeMap<GuildId, GuildSettings>>,
}

impl GuildRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: impl IntoIterator<Item = GuildSettings>) -> Self {
        Self {
            guilds: RwLock::new(settings.into_iter().map(|s| (s.guild_id, s)).collect()),
        }
    }

    /// Load every `.toml` file in `dir`. A missing directory is an empty
    /// registry; a malformed file is an error.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            info!(dir = %dir.display(), "guild config dir does not exist, starting empty");
        }
        Ok(Self {
            guilds: RwLock::new(read_settings(dir)?),
        })
    }

    /// Replace every guild's settings with what `dir` holds now.
    ///
    /// On error the current settings are left as they were.
    pub async fn reload_from_dir(&self, dir: &Path) -> Result<()> {
        let fresh = read_settings(dir)?;
        let mut guilds = self.guilds.write().await;
        if *guilds != fresh {
            info!(dir = %dir.display(), guilds = fresh.len(), "guild config changed on disk");
            *guilds = fresh;
        }
        Ok(())
    }

    /// Write one file per guild into `dir`, creating it if needed.
    pub async fn save_to_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let guilds = self.guilds.read().await;
        for settings in guilds.values() {
            let path = dir.join(format!("{}.toml", settings.guild_id));
            tokio::fs::write(&path, toml::to_string_pretty(settings)?).await?;
        }
        Ok(())
    }

    pub async fn guild_ids(&self) -> Vec<GuildId> {
        self.guilds.read().await.keys().copied().collect()
    }

    pub async fn settings(&self, guild: GuildId) -> Option<GuildSettings> {
        self.guilds.read().await.get(&guild).cloned()
    }

    /// Every tracked pair across all guilds, in guild then file order.
    pub async fn tracked_pairs(&self) -> Vec<TrackedPair> {
        self.guilds
            .read()
            .await
            .values()
            .flat_map(GuildSettings::pairs)
            .collect()
    }

    pub async fn pairs_for_channel(&self, guild: GuildId, channel: ChannelId) -> Vec<TrackedPair> {
        self.guilds
            .read()
            .await
            .get(&guild)
            .map(|s| s.pairs().filter(|p| p.channel == channel).collect())
            .unwrap_or_default()
    }

    /// Track `resource` in `channel`. Returns `false` if it already was.
    pub async fn track(&self, guild: GuildId, channel: ChannelId, resource: ResourceId) -> bool {
        let mut guilds = self.guilds.write().await;
        let settings = guilds
            .entry(guild)
            .or_insert_with(|| GuildSettings::new(guild));
        let idx = match settings.tracked.iter().position(|t| t.channel == channel) {
            Some(idx) => idx,
            None => {
                settings.tracked.push(TrackedChannel {
                    channel,
                    resources: Vec::new(),
                });
                settings.tracked.len() - 1
            }
        };
        let resources = &mut settings.tracked[idx].resources;
        if resources.contains(&resource) {
            return false;
        }
        resources.push(resource);
        true
    }

    /// Stop tracking `resource` in `channel`. Returns `false` if it was not
    /// tracked. A channel left with no resources is dropped.
    pub async fn untrack(&self, guild: GuildId, channel: ChannelId, resource: &ResourceId) -> bool {
        let mut guilds = self.guilds.write().await;
        let Some(settings) = guilds.get_mut(&guild) else {
            return false;
        };
        let Some(idx) = settings.tracked.iter().position(|t| t.channel == channel) else {
            return false;
        };
        let resources = &mut settings.tracked[idx].resources;
        let before = resources.len();
        resources.retain(|r| r != resource);
        let removed = resources.len() != before;
        if resources.is_empty() {
            settings.tracked.remove(idx);
        }
        removed
    }

    pub async fn set_claim_emoji(&self, guild: GuildId, emoji: Emoji) {
        self.update(guild, |s| s.claim_emoji = emoji).await;
    }

    pub async fn set_unclaim_emoji(&self, guild: GuildId, emoji: Emoji) {
        self.update(guild, |s| s.unclaim_emoji = emoji).await;
    }

    pub async fn set_log_channel(&self, guild: GuildId, channel: Option<ChannelId>) {
        self.update(guild, |s| s.log_channel = channel).await;
    }

    async fn update(&self, guild: GuildId, f: impl FnOnce(&mut GuildSettings)) {
        let mut guilds = self.guilds.write().await;
        f(guilds
            .entry(guild)
            .or_insert_with(|| GuildSettings::new(guild)));
    }
}

fn read_settings(dir: &Path) -> Result<BTreeMap<GuildId, GuildSettings>> {
    let mut guilds = BTreeMap::new();
    if !dir.exists() {
        return Ok(guilds);
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Config(format!("cannot read guild config dir {}: {e}", dir.display())))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            let content = std::fs::read_to_string(&path)?;
            let settings: GuildSettings = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("bad guild config {}: {e}", path.display())))?;
            debug!(guild = %settings.guild_id, path = %path.display(), "loaded guild config");
            guilds.insert(settings.guild_id, settings);
        }
    }
    Ok(guilds)
}
