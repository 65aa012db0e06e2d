//! Runs chat intents against the shared queue.
//!
//! A [`Dispatcher`] owns the one queue for the process. Each request is
//! handled under a single lock: precondition checks, the mutation and the
//! persistence write all happen before the next request can look at the
//! queue. The holder-changed notification is returned to the caller to
//! deliver after the lock is gone.

use anyhow::Result;
use parking_lot::Mutex;

use crate::command::Intent;
use crate::error::QueueError;
use crate::queue::{Identity, TurnQueue};
use crate::store::Store;

/// Default private message sent to a participant when their turn starts.
pub const DEFAULT_TURN_MESSAGE: &str =
    "Hey, it's your turn to deploy! Merge the latest main before you ship.";

const HELP: &str = "\
`deploy add _metadata_`: Add yourself to the deploy queue. I'll give you a heads up when it's your turn. Anything after `add` shows up when people ask who's deploying, e.g. `deploy add my_api`.
`deploy done`: Say this when you're done and I'll tell the next person. `deploy complete` and `deploy donzo` work too.
`deploy remove _user_`: Removes a user from the queue. Use `deploy remove me` to remove yourself. Also works as `deploy kick _user_`.
`deploy current`: Who's deploying right now. Also `deploy who's deploying` and `deploy who's at bat`.
`deploy next`: Who's up next. Also `deploy who's next`, `deploy who's on first` and `deploy who's on deck`.
`deploy list`: Lists the queue. It pings everyone in it, use wisely.
`deploy debug`: Like `deploy list`, but for nerds. Also `deploy dump`.
`deploy help`: This thing.";

/// One chat line produced for the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Said to the room.
    Say(String),
    /// Addressed to the requester.
    Reply(String),
}

impl Response {
    pub fn text(&self) -> &str {
        match self {
            Self::Say(text) | Self::Reply(text) => text,
        }
    }
}

/// A private "your turn" message for a new holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub identity: Identity,
    pub message: String,
}

/// Everything one request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// One response per intent (`ping` answers twice).
    pub responses: Vec<Response>,
    /// Set only when the previous holder left and someone else took over.
    pub notification: Option<Notification>,
}

/// Owns the process-wide queue.
pub struct Dispatcher {
    queue: Mutex<TurnQueue>,
    store: Store,
    turn_message: String,
}

impl Dispatcher {
    /// Rehydrate the queue from `store`.
    pub fn open(store: Store, turn_message: impl Into<String>) -> Result<Self> {
        let seed = store.load()?;
        let queue = TurnQueue::from_seed(seed);
        tracing::info!(length = queue.len(), "Loaded deploy queue");
        Ok(Self {
            queue: Mutex::new(queue),
            store,
            turn_message: turn_message.into(),
        })
    }

    /// Number of people currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Handle one request from `caller`.
    pub fn handle(&self, caller: &str, intent: &Intent) -> Outcome {
        let mut queue = self.queue.lock();
        let holder_before = queue.current().map(|p| p.identity.clone());
        let len_before = queue.len();

        let responses = match run(&mut queue, caller, intent) {
            Ok(responses) => responses,
            Err(err) => {
                tracing::debug!(identity = caller, ?intent, error = %err, "Request refused");
                vec![refusal(caller, intent, err)]
            }
        };

        let changed = queue.len() != len_before;
        if changed {
            tracing::info!(
                identity = subject(caller, intent),
                caller,
                ?intent,
                length = queue.len(),
                "Queue updated"
            );
            if let Err(e) = self.store.save(&queue.snapshot()) {
                tracing::error!(error = %e, "Failed to persist deploy queue");
            }
        }

        let holder_after = queue.current().map(|p| p.identity.clone());
        drop(queue);

        let notification = match (holder_before, holder_after) {
            (Some(before), Some(after)) if before != after => Some(Notification {
                identity: after,
                message: self.turn_message.clone(),
            }),
            _ => None,
        };

        Outcome {
            responses,
            notification,
        }
    }
}

fn run(queue: &mut TurnQueue, caller: &str, intent: &Intent) -> Result<Vec<Response>, QueueError> {
    let response = match intent {
        Intent::Help => Response::Say(HELP.to_string()),
        Intent::Join { metadata } => join(queue, caller, metadata)?,
        Intent::Finish => finish(queue, caller)?,
        Intent::WhoNow => who_now(queue, caller),
        Intent::WhoNext => who_next(queue, caller),
        Intent::Remove { target } if is_self(caller, target) => remove_self(queue, caller)?,
        Intent::Remove { target } => remove_other(queue, target)?,
        Intent::List => list(queue),
        Intent::Dump => dump(queue),
        Intent::Ping => {
            return Ok(vec![
                Response::Say("deploy pong".to_string()),
                Response::Reply("deploy reply pong".to_string()),
            ]);
        }
    };
    Ok(vec![response])
}

/// Whose queue entry a request changes.
fn subject<'a>(caller: &'a str, intent: &'a Intent) -> &'a str {
    match intent {
        Intent::Remove { target } if !is_self(caller, target) => target,
        _ => caller,
    }
}

fn is_self(caller: &str, target: &str) -> bool {
    target.eq_ignore_ascii_case("me") || target == caller
}

fn join(queue: &mut TurnQueue, caller: &str, metadata: &str) -> Result<Response, QueueError> {
    let text = match queue.enqueue(caller, metadata)? {
        0 => "Deploy away!".to_string(),
        1 => "Cool, you're up next.".to_string(),
        ahead => format!(
            "Alright, there are {ahead} people ahead of you. I'll let you know when it's your turn."
        ),
    };
    Ok(Response::Reply(text))
}

fn finish(queue: &mut TurnQueue, caller: &str) -> Result<Response, QueueError> {
    if !queue.contains(caller) {
        return Err(QueueError::NotQueued);
    }
    if !queue.is_current(caller) {
        return Err(QueueError::NotYourTurn);
    }
    queue.advance()?;
    Ok(Response::Reply("Nice work! :tada:".to_string()))
}

fn who_now(queue: &TurnQueue, caller: &str) -> Response {
    match queue.current() {
        None => Response::Say("Nobody!".to_string()),
        Some(p) if p.identity.as_str() == caller => {
            Response::Reply("It's you. You're deploying. Right now.".to_string())
        }
        Some(p) if p.metadata.is_empty() => Response::Say(format!("{} is deploying.", p.identity)),
        Some(p) => Response::Say(format!("{} is deploying {}", p.identity, p.metadata)),
    }
}

fn who_next(queue: &TurnQueue, caller: &str) -> Response {
    match queue.next() {
        None => Response::Say("Nobody!".to_string()),
        Some(p) if p.identity.as_str() == caller => {
            Response::Reply("You're up next! Get ready!".to_string())
        }
        Some(p) => Response::Say(format!("{} is on deck.", p.identity)),
    }
}

fn remove_self(queue: &mut TurnQueue, caller: &str) -> Result<Response, QueueError> {
    if !queue.contains(caller) {
        return Err(QueueError::NotQueued);
    }
    if queue.is_current(caller) {
        return Err(QueueError::CannotSelfRemoveWhileHolding);
    }
    queue.remove(caller)?;
    Ok(Response::Reply(
        "Done, you're out of the queue. Come back soon!".to_string(),
    ))
}

fn remove_other(queue: &mut TurnQueue, target: &str) -> Result<Response, QueueError> {
    let removed = queue.remove(target)?;
    Ok(Response::Say(format!(
        "{} has been removed from the queue.",
        removed.identity
    )))
}

fn list(queue: &TurnQueue) -> Response {
    if queue.is_empty() {
        return Response::Say("Nobody! Like this: []".to_string());
    }
    let lines: Vec<String> = queue
        .snapshot()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if p.metadata.is_empty() {
                format!("{}. {}", i + 1, p.identity)
            } else {
                format!("{}. {} ({})", i + 1, p.identity, p.metadata)
            }
        })
        .collect();
    Response::Say(format!("Here's the queue:\n{}", lines.join("\n")))
}

fn dump(queue: &TurnQueue) -> Response {
    let text = serde_json::to_string_pretty(&queue.snapshot())
        .unwrap_or_else(|e| format!("Couldn't serialize the queue: {e}"));
    Response::Say(text)
}

/// The fixed chat message for a refused request.
fn refusal(caller: &str, intent: &Intent, err: QueueError) -> Response {
    match (intent, err) {
        (Intent::Join { .. }, QueueError::AlreadyQueued) => Response::Reply(
            "Hold on! You're already in the queue. Give everyone else a chance, ok?".to_string(),
        ),
        (Intent::Finish, QueueError::NotYourTurn) => {
            Response::Reply("It's not your turn yet :cry:".to_string())
        }
        (Intent::Finish, _) => Response::Reply("You're not in the queue! :grimacing:".to_string()),
        (Intent::Remove { target }, QueueError::NotQueued) if !is_self(caller, target) => {
            Response::Say(format!("{target} isn't in the queue :)"))
        }
        (Intent::Remove { .. }, QueueError::NotQueued) => {
            Response::Reply("You weren't even in the queue :)".to_string())
        }
        (_, QueueError::CannotSelfRemoveWhileHolding) => Response::Reply(
            "You're deploying right now! Did you mean `deploy done`?".to_string(),
        ),
        (_, QueueError::EmptyQueue) => Response::Say("Nobody!".to_string()),
        (_, err) => Response::Reply(format!("Can't do that: {err}.")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::open(Store::in_memory().unwrap(), DEFAULT_TURN_MESSAGE).unwrap()
    }

    fn join(d: &Dispatcher, who: &str, metadata: &str) -> Outcome {
        d.handle(
            who,
            &Intent::Join {
                metadata: metadata.to_string(),
            },
        )
    }

    fn remove(d: &Dispatcher, who: &str, target: &str) -> Outcome {
        d.handle(
            who,
            &Intent::Remove {
                target: target.to_string(),
            },
        )
    }

    #[test]
    fn kick_is_attributed_to_target() {
        let kick = Intent::Remove {
            target: "bob".to_string(),
        };
        assert_eq!(subject("carol", &kick), "bob");
        let me = Intent::Remove {
            target: "me".to_string(),
        };
        assert_eq!(subject("carol", &me), "carol");
        assert_eq!(subject("carol", &Intent::Finish), "carol");
    }

    fn single(outcome: &Outcome) -> &Response {
        assert_eq!(outcome.responses.len(), 1, "{outcome:?}");
        &outcome.responses[0]
    }

    #[test]
    fn join_reports_position() {
        let d = dispatcher();
        assert_eq!(
            single(&join(&d, "alice", "svc-a")),
            &Response::Reply("Deploy away!".to_string())
        );
        assert_eq!(
            single(&join(&d, "bob", "")),
            &Response::Reply("Cool, you're up next.".to_string())
        );
        let third = join(&d, "carol", "");
        assert!(single(&third).text().contains("2 people ahead"));
        assert!(third.notification.is_none());
    }

    #[test]
    fn join_twice_refused() {
        let d = dispatcher();
        join(&d, "alice", "");
        let again = join(&d, "alice", "other");
        assert!(matches!(single(&again), Response::Reply(t) if t.contains("already in the queue")));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn finish_by_holder_notifies_next() {
        let d = dispatcher();
        join(&d, "alice", "");
        join(&d, "bob", "");
        let out = d.handle("alice", &Intent::Finish);
        assert_eq!(single(&out), &Response::Reply("Nice work! :tada:".to_string()));
        let note = out.notification.unwrap();
        assert_eq!(note.identity.as_str(), "bob");
        assert_eq!(note.message, DEFAULT_TURN_MESSAGE);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn finish_last_one_out_notifies_nobody() {
        let d = dispatcher();
        join(&d, "alice", "");
        let out = d.handle("alice", &Intent::Finish);
        assert!(out.notification.is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn finish_out_of_turn() {
        let d = dispatcher();
        join(&d, "alice", "");
        join(&d, "bob", "");
        let out = d.handle("bob", &Intent::Finish);
        assert_eq!(
            single(&out),
            &Response::Reply("It's not your turn yet :cry:".to_string())
        );
        assert!(out.notification.is_none());
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn finish_when_absent() {
        let d = dispatcher();
        let out = d.handle("zed", &Intent::Finish);
        assert!(single(&out).text().contains("not in the queue"));
    }

    #[test]
    fn who_now_variants() {
        let d = dispatcher();
        assert_eq!(
            single(&d.handle("bob", &Intent::WhoNow)),
            &Response::Say("Nobody!".to_string())
        );
        join(&d, "alice", "billing-api");
        assert_eq!(
            single(&d.handle("bob", &Intent::WhoNow)),
            &Response::Say("alice is deploying billing-api".to_string())
        );
        assert!(matches!(
            single(&d.handle("alice", &Intent::WhoNow)),
            Response::Reply(t) if t.starts_with("It's you")
        ));
    }

    #[test]
    fn who_now_without_metadata() {
        let d = dispatcher();
        join(&d, "alice", "");
        assert_eq!(
            single(&d.handle("bob", &Intent::WhoNow)),
            &Response::Say("alice is deploying.".to_string())
        );
    }

    #[test]
    fn who_next_variants() {
        let d = dispatcher();
        join(&d, "alice", "");
        assert_eq!(
            single(&d.handle("alice", &Intent::WhoNext)),
            &Response::Say("Nobody!".to_string())
        );
        join(&d, "bob", "");
        assert_eq!(
            single(&d.handle("carol", &Intent::WhoNext)),
            &Response::Say("bob is on deck.".to_string())
        );
        assert!(matches!(
            single(&d.handle("bob", &Intent::WhoNext)),
            Response::Reply(t) if t.contains("up next")
        ));
    }

    #[test]
    fn remove_me_while_waiting() {
        let d = dispatcher();
        join(&d, "alice", "");
        join(&d, "bob", "");
        let out = remove(&d, "bob", "me");
        assert!(matches!(single(&out), Response::Reply(t) if t.contains("out of the queue")));
        assert!(out.notification.is_none());
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn remove_own_nick_counts_as_self() {
        let d = dispatcher();
        join(&d, "alice", "");
        let out = remove(&d, "alice", "alice");
        assert!(single(&out).text().contains("deploy done"));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn remove_me_while_holding_refused() {
        let d = dispatcher();
        join(&d, "alice", "");
        join(&d, "bob", "");
        let out = remove(&d, "alice", "ME");
        assert_eq!(
            single(&out),
            &Response::Reply("You're deploying right now! Did you mean `deploy done`?".to_string())
        );
        assert!(out.notification.is_none());
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn remove_me_when_absent() {
        let d = dispatcher();
        join(&d, "alice", "");
        let out = remove(&d, "bob", "me");
        assert_eq!(
            single(&out),
            &Response::Reply("You weren't even in the queue :)".to_string())
        );
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn kick_holder_notifies_new_holder() {
        let d = dispatcher();
        join(&d, "alice", "");
        join(&d, "bob", "");
        let out = remove(&d, "carol", "alice");
        assert_eq!(
            single(&out),
            &Response::Say("alice has been removed from the queue.".to_string())
        );
        assert_eq!(out.notification.unwrap().identity.as_str(), "bob");
    }

    #[test]
    fn kick_sole_holder_notifies_nobody() {
        let d = dispatcher();
        join(&d, "alice", "");
        let out = remove(&d, "carol", "alice");
        assert!(out.notification.is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn kick_waiting_member_is_quiet() {
        let d = dispatcher();
        join(&d, "alice", "");
        join(&d, "bob", "");
        join(&d, "carol", "");
        let out = remove(&d, "alice", "bob");
        assert!(out.notification.is_none());
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn kick_missing_member() {
        let d = dispatcher();
        let out = remove(&d, "alice", "bob");
        assert_eq!(
            single(&out),
            &Response::Say("bob isn't in the queue :)".to_string())
        );
    }

    #[test]
    fn list_formats_roster() {
        let d = dispatcher();
        assert_eq!(
            single(&d.handle("x", &Intent::List)),
            &Response::Say("Nobody! Like this: []".to_string())
        );
        join(&d, "alice", "svc-a");
        join(&d, "bob", "");
        assert_eq!(
            single(&d.handle("x", &Intent::List)),
            &Response::Say("Here's the queue:\n1. alice (svc-a)\n2. bob".to_string())
        );
    }

    #[test]
    fn dump_is_json() {
        let d = dispatcher();
        join(&d, "alice", "svc-a");
        let out = d.handle("x", &Intent::Dump);
        let parsed: serde_json::Value = serde_json::from_str(single(&out).text()).unwrap();
        assert_eq!(parsed[0]["identity"], "alice");
        assert_eq!(parsed[0]["metadata"], "svc-a");
        assert!(parsed[0]["queued_at"].is_string());
    }

    #[test]
    fn ping_answers_twice() {
        let d = dispatcher();
        let out = d.handle("x", &Intent::Ping);
        assert_eq!(
            out.responses,
            vec![
                Response::Say("deploy pong".to_string()),
                Response::Reply("deploy reply pong".to_string()),
            ]
        );
    }

    #[test]
    fn help_mentions_every_command() {
        let d = dispatcher();
        let out = d.handle("x", &Intent::Help);
        let text = single(&out).text();
        for cmd in ["add", "done", "remove", "current", "next", "list", "debug", "help"] {
            assert!(text.contains(&format!("`deploy {cmd}")), "missing {cmd}");
        }
    }

    #[test]
    fn mutations_are_persisted() {
        let d = dispatcher();
        join(&d, "alice", "svc-a");
        join(&d, "bob", "");
        d.handle("alice", &Intent::Finish);
        let stored = d.store.load().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].identity.as_str(), "bob");
    }

    #[test]
    fn custom_turn_message() {
        let d = Dispatcher::open(Store::in_memory().unwrap(), "ship it").unwrap();
        join(&d, "alice", "");
        join(&d, "bob", "");
        let out = d.handle("alice", &Intent::Finish);
        assert_eq!(out.notification.unwrap().message, "ship it");
    }
}
