//! verifyq CLI: run the sync daemon and edit per-guild settings.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use verifyq::codec;
use verifyq::config::guild::GuildRegistry;
use verifyq::model::{ChannelId, ClaimState, Emoji, GuildId, ResourceId};
use verifyq::source::{QueueSource, SpeedrunClient};

#[derive(Parser)]
#[command(name = "verifyq", about = "Mirror a speedrun verification queue into a chat channel")]
struct Cli {
    /// Directory of per-guild TOML files (overrides GUILD_CONFIG_DIR)
    #[arg(long, global = true)]
    guilds: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync daemon against Discord and speedrun.com
    ///
    /// Guild files are re-read at every tick, so `track`, `emoji` and
    /// `log-channel` changes apply to a running daemon within one interval.
    Serve,
    /// Tracked channel operations (a running daemon picks them up at its next tick)
    Track {
        #[command(subcommand)]
        action: TrackAction,
    },
    /// Set a guild's claim or unclaim marker
    Emoji {
        which: Marker,
        guild: u64,
        /// Unicode emoji, or `<:name:id>` for a custom one
        emoji: String,
    },
    /// Set (or clear, if omitted) a guild's operator log channel
    LogChannel { guild: u64, channel: Option<u64> },
    /// Print the messages a resource's pending queue would produce
    Preview {
        resource: String,
        /// Wrap player names in spoiler tags
        #[arg(long)]
        spoiler: bool,
    },
}

#[derive(Subcommand)]
enum TrackAction {
    /// Track a resource in a channel
    Add {
        guild: u64,
        channel: u64,
        resource: String,
    },
    /// Stop tracking a resource in a channel
    Remove {
        guild: u64,
        channel: u64,
        resource: String,
    },
    /// List tracked pairs
    List {
        /// Only this guild
        guild: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Marker {
    Claim,
    Unclaim,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let guild_dir = cli.guilds.unwrap_or_else(|| {
        std::env::var("GUILD_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("guilds"))
    });

    match cli.command {
        Command::Serve => cmd_serve(guild_dir).await,
        Command::Track { action } => cmd_track(&guild_dir, action).await,
        Command::Emoji {
            which,
            guild,
            emoji,
        } => {
            let registry = GuildRegistry::load_from_dir(&guild_dir)?;
            let emoji = Emoji::new(emoji.trim());
            match which {
                Marker::Claim => registry.set_claim_emoji(GuildId(guild), emoji.clone()).await,
                Marker::Unclaim => registry.set_unclaim_emoji(GuildId(guild), emoji.clone()).await,
            }
            registry.save_to_dir(&guild_dir).await?;
            println!("Set marker to {emoji} (existing reactions are left as they are)");
            Ok(())
        }
        Command::LogChannel { guild, channel } => {
            let registry = GuildRegistry::load_from_dir(&guild_dir)?;
            registry
                .set_log_channel(GuildId(guild), channel.map(ChannelId))
                .await;
            registry.save_to_dir(&guild_dir).await?;
            match channel {
                Some(channel) => println!("Log channel for {guild} set to {channel}"),
                None => println!("Log channel for {guild} cleared"),
            }
            Ok(())
        }
        Command::Preview { resource, spoiler } => cmd_preview(resource, spoiler).await,
    }
}

#[cfg(feature = "discord")]
async fn cmd_serve(guild_dir: PathBuf) -> anyhow::Result<()> {
    use std::sync::Arc;
    use verifyq::chat::discord::{DiscordChat, Gateway};
    use verifyq::config::Config;
    use verifyq::engine::{SchedulerConfig, SchedulingLoop};
    use verifyq::telemetry::{TelemetryConfig, init_telemetry};

    let mut config = Config::from_env()?;
    config.guild_config_dir = guild_dir;

    let _guard = init_telemetry(TelemetryConfig::from(&config))?;

    let registry = Arc::new(GuildRegistry::load_from_dir(&config.guild_config_dir)?);
    let source = Arc::new(SpeedrunClient::new(
        &config.src_api_base,
        config.src_api_key.as_ref(),
    )?);
    let chat = Arc::new(DiscordChat::connect(&config.discord_token).await?);

    let scheduler = SchedulingLoop::new(
        source,
        chat,
        registry,
        SchedulerConfig {
            tick_interval: config.tick_interval,
            history_limit: config.history_limit,
            guild_config_dir: Some(config.guild_config_dir.clone()),
        },
    );
    let handle = scheduler.handle();

    let gateway = Gateway::connect(&config.discord_token, handle.events()).await?;
    let shards = gateway.shard_manager();
    let gateway_task = tokio::spawn(gateway.start());

    let stopper = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received");
        stopper.shutdown();
    });

    scheduler.run().await;
    shards.shutdown_all().await;
    if let Ok(Err(e)) = gateway_task.await {
        tracing::warn!(error = %e, "gateway exited with error");
    }
    Ok(())
}

#[cfg(not(feature = "discord"))]
async fn cmd_serve(_guild_dir: PathBuf) -> anyhow::Result<()> {
    anyhow::bail!("verifyq was built without the `discord` feature; rebuild with --features discord")
}

async fn cmd_track(guild_dir: &Path, action: TrackAction) -> anyhow::Result<()> {
    let registry = GuildRegistry::load_from_dir(guild_dir)?;
    match action {
        TrackAction::Add {
            guild,
            channel,
            resource,
        } => {
            if registry
                .track(GuildId(guild), ChannelId(channel), ResourceId::new(&resource))
                .await
            {
                registry.save_to_dir(guild_dir).await?;
                println!("Tracking {resource} in {channel}");
            } else {
                println!("{resource} is already tracked in {channel}");
            }
        }
        TrackAction::Remove {
            guild,
            channel,
            resource,
        } => {
            if registry
                .untrack(GuildId(guild), ChannelId(channel), &ResourceId::new(&resource))
                .await
            {
                registry.save_to_dir(guild_dir).await?;
                println!("No longer tracking {resource} in {channel}");
            } else {
                anyhow::bail!("{resource} is not tracked in {channel}");
            }
        }
        TrackAction::List { guild } => {
            let pairs = registry.tracked_pairs().await;
            let pairs: Vec<_> = pairs
                .iter()
                .filter(|p| guild.is_none_or(|g| p.guild.get() == g))
                .collect();
            if pairs.is_empty() {
                println!("No tracked channels.");
                return Ok(());
            }
            println!("{:<20}  {:<20}  RESOURCE", "GUILD", "CHANNEL");
            println!("{}", "-".repeat(60));
            for pair in &pairs {
                println!("{:<20}  {:<20}  {}", pair.guild, pair.channel, pair.resource);
            }
            println!("\n{} pair(s)", pairs.len());
        }
    }
    Ok(())
}

async fn cmd_preview(resource: String, spoiler: bool) -> anyhow::Result<()> {
    let api_base = std::env::var("SRC_API_BASE")
        .unwrap_or_else(|_| verifyq::source::speedrun::DEFAULT_API_BASE.to_string());
    let api_key = std::env::var("SRC_API_KEY")
        .ok()
        .map(secrecy::SecretString::from);
    let client = SpeedrunClient::new(&api_base, api_key.as_ref())?;

    let resource = ResourceId::new(resource);
    let described = client.describe(&resource).await?;
    let pending = client.list_pending(&resource).await?;
    for item in &pending {
        println!(
            "{}\n",
            codec::encode(&described.name, item, spoiler, &ClaimState::Unclaimed)
        );
    }
    println!("{} pending run(s) for {}", pending.len(), described.name);
    Ok(())
}
