//! The deploy-turn queue engine.
//!
//! Participants wait in arrival order. The holder is whoever sits at
//! position 0; it is never stored separately, so it cannot drift from the
//! queue contents. Identities are unique across the whole queue.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Opaque, case-sensitive participant key (a chat nick in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Someone waiting for (or holding) the deploy turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: Identity,
    /// Free-form note given at join time, e.g. the service being deployed.
    pub metadata: String,
    pub queued_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(identity: impl Into<Identity>, metadata: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            metadata: metadata.into(),
            queued_at: Utc::now(),
        }
    }
}

/// Ordered, duplicate-free queue of participants.
#[derive(Debug, Clone, Default)]
pub struct TurnQueue {
    entries: VecDeque<Participant>,
}

impl TurnQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted state.
    ///
    /// Later duplicates of an identity are dropped so the uniqueness
    /// invariant holds even if the stored sequence is corrupt.
    pub fn from_seed(seed: Vec<Participant>) -> Self {
        let mut queue = Self::new();
        for participant in seed {
            if queue.contains(participant.identity.as_str()) {
                tracing::warn!(
                    identity = %participant.identity,
                    "Dropping duplicate participant from stored queue"
                );
                continue;
            }
            queue.entries.push_back(participant);
        }
        queue
    }

    /// Append `identity` at the tail. Returns its position (0 = holder).
    pub fn enqueue(
        &mut self,
        identity: impl Into<Identity>,
        metadata: impl Into<String>,
    ) -> Result<usize, QueueError> {
        let participant = Participant::new(identity, metadata);
        if self.contains(participant.identity.as_str()) {
            return Err(QueueError::AlreadyQueued);
        }
        self.entries.push_back(participant);
        Ok(self.entries.len() - 1)
    }

    /// Remove and return the holder.
    ///
    /// Does not check who is asking; callers confirm [`Self::is_current`]
    /// first.
    pub fn advance(&mut self) -> Result<Participant, QueueError> {
        self.entries.pop_front().ok_or(QueueError::EmptyQueue)
    }

    /// Remove `identity` from wherever it sits, keeping everyone else in
    /// order.
    pub fn remove(&mut self, identity: &str) -> Result<Participant, QueueError> {
        let idx = self.position(identity).ok_or(QueueError::NotQueued)?;
        self.entries.remove(idx).ok_or(QueueError::NotQueued)
    }

    /// The holder, if anyone is queued.
    pub fn current(&self) -> Option<&Participant> {
        self.entries.front()
    }

    /// Whoever becomes holder after the next advance.
    pub fn next(&self) -> Option<&Participant> {
        self.entries.get(1)
    }

    pub fn position(&self, identity: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|p| p.identity.as_str() == identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.position(identity).is_some()
    }

    pub fn is_current(&self, identity: &str) -> bool {
        self.current()
            .is_some_and(|p| p.identity.as_str() == identity)
    }

    pub fn is_next(&self, identity: &str) -> bool {
        self.next().is_some_and(|p| p.identity.as_str() == identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned copy of the queue, head first.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.entries.iter().cloned().collect()
    }
}
