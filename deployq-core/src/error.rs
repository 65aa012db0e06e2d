//! Queue failures.

use thiserror::Error;

/// Every way a queue request can be refused.
///
/// None of these are fatal. The dispatcher turns each one into a fixed chat
/// message and leaves the queue untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Join attempted by someone who is already waiting.
    #[error("already queued")]
    AlreadyQueued,

    /// The identity is not in the queue.
    #[error("not queued")]
    NotQueued,

    /// Finish attempted by someone who is queued but not holding the turn.
    #[error("not your turn")]
    NotYourTurn,

    /// The holder tried to remove themselves instead of finishing.
    #[error("cannot remove yourself while holding the turn")]
    CannotSelfRemoveWhileHolding,

    /// Advance or inspection on an empty queue.
    #[error("queue is empty")]
    EmptyQueue,
}
