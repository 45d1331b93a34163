//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.
//! Per-guild settings live in TOML files, see [`guild`].

pub mod guild;
pub mod secrets;

use crate::error::{Error, Result};
use crate::source::speedrun::DEFAULT_API_BASE;
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub discord_token: SecretString,
    pub src_api_key: Option<SecretString>,
    pub src_api_base: String,
    pub guild_config_dir: PathBuf,
    pub tick_interval: Duration,
    pub history_limit: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            discord_token: SecretString::from(required_var("DISCORD_TOKEN")?),
            src_api_key: std::env::var("SRC_API_KEY").ok().map(SecretString::from),
            src_api_base: std::env::var("SRC_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            guild_config_dir: std::env::var("GUILD_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("guilds")),
            tick_interval: Duration::from_secs(nonzero_var("TICK_INTERVAL_SECS", 60)?),
            history_limit: nonzero_var("HISTORY_LIMIT", 200)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("environment variable {name} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn nonzero_var<T: FromStr + Default + PartialEq>(name: &str, default: T) -> Result<T> {
    let value = parsed_var(name, default)?;
    if value == T::default() {
        return Err(Error::Config(format!("environment variable {name} must be greater than zero")));
    }
    Ok(value)
}
