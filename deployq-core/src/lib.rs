//! deployq-core: the deploy-turn queue.
//!
//! One shared deployment target, one queue of people waiting for it. The
//! person at the head of the queue holds the turn; everyone else waits in
//! arrival order.
//!
//! - [`queue`]: the queue engine (pure state, no I/O)
//! - [`command`]: chat text → [`command::Intent`]
//! - [`dispatch`]: runs intents against the shared queue, renders responses,
//!   decides who gets a "your turn" notification
//! - [`store`]: SQLite persistence so the queue survives restarts

pub mod command;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod store;

pub use command::Intent;
pub use dispatch::{Dispatcher, Notification, Outcome, Response};
pub use error::QueueError;
pub use queue::{Identity, Participant, TurnQueue};
pub use store::Store;
