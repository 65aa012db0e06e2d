//! deployq: hands out deploy turns over IRC.
//!
//! Runs as a single process connected to one IRC server. Talk to it in a
//! channel (`deployq: deploy add my_api` or `!deploy add my_api`) or in a
//! private message (`deploy add my_api`). Try `deploy help`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use deployq_bot::bot::Bot;
use deployq_bot::client::{self, ClientHandle, ConnectConfig, ReconnectConfig};
use deployq_bot::config::{Args, Resolved};
use deployq_bot::event::Event;
use deployq_core::{Dispatcher, Store};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deployq_bot=info,deployq_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Resolved::load(&args)?;

    if let Some(parent) = settings.db.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = Store::open(&settings.db)?;
    let dispatcher = Arc::new(Dispatcher::open(store, settings.turn_message.clone())?);

    tracing::info!(
        server = %settings.server,
        nick = %settings.nick,
        channels = ?settings.channels,
        db = %settings.db.display(),
        queued = dispatcher.len(),
        "Starting deployq"
    );

    let config = ConnectConfig {
        server_addr: settings.server.clone(),
        nick: settings.nick.clone(),
        user: settings.nick.clone(),
        realname: "deploy queue bot".to_string(),
        tls: settings.tls,
    };
    let reconnect = ReconnectConfig {
        channels: settings.channels.clone(),
        ..Default::default()
    };

    let bot = Arc::new(Bot::new(dispatcher, &settings.nick, &settings.prefix));

    let run = client::run_with_reconnect(config, reconnect, move |handle: ClientHandle, event: Event| {
        let bot = bot.clone();
        Box::pin(async move { bot.handle_event(&handle, &event).await })
    });

    tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
