//! Routes chat events to the deploy queue and sends the answers back.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use deployq_core::{Dispatcher, Intent, Notification, Outcome, Response};

use crate::client::ClientHandle;
use crate::event::Event;
use crate::output;

/// The deploy bot: one shared [`Dispatcher`] plus addressing rules.
pub struct Bot {
    dispatcher: Arc<Dispatcher>,
    prefix: String,
    /// Our nick as confirmed by the server.
    nick: RwLock<String>,
}

impl Bot {
    pub fn new(dispatcher: Arc<Dispatcher>, nick: &str, prefix: &str) -> Self {
        Self {
            dispatcher,
            prefix: prefix.to_string(),
            nick: RwLock::new(nick.to_string()),
        }
    }

    pub async fn handle_event(&self, handle: &ClientHandle, event: &Event) -> Result<()> {
        match event {
            Event::Connected => tracing::info!("Connected"),

            Event::Registered { nick } => {
                tracing::info!(nick = %nick, "Registered");
                *self.nick.write().await = nick.clone();
            }

            Event::NickChanged { old_nick, new_nick } => {
                let mut nick = self.nick.write().await;
                if *nick == *old_nick {
                    tracing::info!(nick = %new_nick, "Our nick changed");
                    *nick = new_nick.clone();
                }
            }

            Event::Joined { channel, nick } => {
                if *nick == *self.nick.read().await {
                    tracing::info!(channel = %channel, "Joined");
                }
            }

            Event::Message { from, target, text } => {
                let bot_nick = self.nick.read().await.clone();
                if *from == bot_nick {
                    return Ok(());
                }

                let is_channel = target.starts_with('#') || target.starts_with('&');
                let Some(command) = addressed(&bot_nick, &self.prefix, is_channel, text) else {
                    return Ok(());
                };
                let Some(intent) = Intent::parse(command) else {
                    return Ok(());
                };

                // Channel requests are answered in the channel, private ones privately
                let reply_to = if is_channel { target.as_str() } else { from.as_str() };
                let outcome = self.dispatcher.handle(from, &intent);
                deliver(handle, reply_to, from, outcome).await?;
            }

            Event::ServerNotice { text } => tracing::debug!(text = %text, "Notice"),

            Event::Disconnected { reason } => tracing::warn!(reason = %reason, "Disconnected"),
        }
        Ok(())
    }
}

/// Extract the command text from a message meant for the bot.
///
/// In a channel the bot must be addressed, either by nick (`deployq: ...`,
/// `deployq, ...`, `@deployq ...`) or by prefix (`!deploy ...`). Private
/// messages are always for the bot.
fn addressed<'a>(nick: &str, prefix: &str, is_channel: bool, text: &'a str) -> Option<&'a str> {
    let text = text.trim();
    if let Some(rest) = strip_nick(nick, text) {
        return Some(rest);
    }
    if !prefix.is_empty()
        && let Some(rest) = text.strip_prefix(prefix)
    {
        return Some(rest.trim_start());
    }
    if is_channel { None } else { Some(text) }
}

fn strip_nick<'a>(nick: &str, text: &'a str) -> Option<&'a str> {
    let text = text.strip_prefix('@').unwrap_or(text);
    let head = text.get(..nick.len())?;
    if !head.eq_ignore_ascii_case(nick) {
        return None;
    }
    let rest = &text[nick.len()..];
    let rest = rest
        .strip_prefix(':')
        .or_else(|| rest.strip_prefix(','))
        .unwrap_or(rest);
    // `deployqueue` is not `deployq`
    if rest.len() == text.len() - nick.len() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim_start())
}

/// Send the responses, then the holder notification.
async fn deliver(handle: &ClientHandle, target: &str, from: &str, outcome: Outcome) -> Result<()> {
    for response in &outcome.responses {
        match response {
            Response::Say(text) => output::say(handle, target, text).await?,
            Response::Reply(text) => output::reply(handle, target, from, text).await?,
        }
    }
    if let Some(note) = outcome.notification {
        notify(handle, note).await;
    }
    Ok(())
}

/// Best effort: a lost notification never affects the queue.
async fn notify(handle: &ClientHandle, note: Notification) {
    tracing::info!(identity = %note.identity, "Notifying new holder");
    if let Err(e) = output::say(handle, note.identity.as_str(), &note.message).await {
        tracing::warn!(identity = %note.identity, error = %e, "Failed to notify new holder");
    }
}
