//! Bot configuration.
//!
//! Command-line flags (or their environment variables) win over the config
//! file, which wins over built-in defaults. The config file lives at
//! `~/.config/deployq/bot.toml` unless `--config` points elsewhere.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use deployq_core::dispatch::DEFAULT_TURN_MESSAGE;

/// Default IRC server.
pub const DEFAULT_SERVER: &str = "127.0.0.1:6667";
/// Default bot nick.
pub const DEFAULT_NICK: &str = "deployq";
/// Default channel to join.
pub const DEFAULT_CHANNEL: &str = "#deploys";
/// Default command prefix for channel messages.
pub const DEFAULT_PREFIX: &str = "!";

#[derive(Parser, Debug, Default)]
#[command(name = "deployq", about = "IRC bot that hands out deploy turns")]
pub struct Args {
    /// IRC server address (host:port)
    #[arg(long, env = "DEPLOYQ_SERVER")]
    pub server: Option<String>,

    /// Bot nick
    #[arg(long, env = "DEPLOYQ_NICK")]
    pub nick: Option<String>,

    /// Channels to join (comma-separated)
    #[arg(long, env = "DEPLOYQ_CHANNELS")]
    pub channels: Option<String>,

    /// Use TLS (implied by port 6697)
    #[arg(long)]
    pub tls: bool,

    /// Queue database path
    #[arg(long, env = "DEPLOYQ_DB")]
    pub db: Option<PathBuf>,

    /// Command prefix for channel messages, e.g. `!deploy add`
    #[arg(long, env = "DEPLOYQ_PREFIX")]
    pub prefix: Option<String>,

    /// Config file (default: ~/.config/deployq/bot.toml)
    #[arg(long, env = "DEPLOYQ_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Contents of `bot.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<String>,
    pub nick: Option<String>,
    pub channels: Option<Vec<String>>,
    pub tls: Option<bool>,
    pub db: Option<PathBuf>,
    pub prefix: Option<String>,
    /// Private message sent to whoever gets the turn next.
    pub turn_message: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Can't read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Bad config file {}", path.display()))
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deployq")
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deployq")
        .join("queue.db")
}

/// Effective settings after merging all sources.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub server: String,
    pub nick: String,
    pub channels: Vec<String>,
    pub tls: bool,
    pub db: PathBuf,
    pub prefix: String,
    pub turn_message: String,
}

impl Resolved {
    /// Read the config file named by `args` (or the default one, if it
    /// exists) and merge.
    pub fn load(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let path = config_dir().join("bot.toml");
                if path.exists() {
                    FileConfig::load(&path)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Ok(Self::merge(args, &file))
    }

    /// Merge: CLI > config file > defaults.
    pub fn merge(args: &Args, file: &FileConfig) -> Self {
        let server = args
            .server
            .clone()
            .or_else(|| file.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        let nick = args
            .nick
            .clone()
            .or_else(|| file.nick.clone())
            .unwrap_or_else(|| DEFAULT_NICK.to_string());

        let channels = if let Some(ref ch) = args.channels {
            ch.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(ref ch) = file.channels {
            ch.clone()
        } else {
            vec![DEFAULT_CHANNEL.to_string()]
        };

        let tls = args.tls || file.tls.unwrap_or(false) || server.ends_with(":6697");

        let db = args
            .db
            .clone()
            .or_else(|| file.db.clone())
            .unwrap_or_else(default_db_path);

        let prefix = args
            .prefix
            .clone()
            .or_else(|| file.prefix.clone())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        let turn_message = file
            .turn_message
            .clone()
            .unwrap_or_else(|| DEFAULT_TURN_MESSAGE.to_string());

        Self {
            server,
            nick,
            channels,
            tls,
            db,
            prefix,
            turn_message,
        }
    }
}
