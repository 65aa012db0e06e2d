//! deployq-bot: the deploy queue on IRC.
//!
//! Connects to an IRC server, joins the configured channels and answers
//! `deploy ...` commands from [`deployq_core`]. Whoever's turn comes up gets
//! a private message.

pub mod bot;
pub mod client;
pub mod config;
pub mod event;
pub mod irc;
pub mod output;
