//! Message status - the lifecycle of a single message
//!
//! `local → (loading) → updating* → {success | error | abort}`. A reload
//! restarts a settled (or local) message at `loading`/`updating`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of one message record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Authored locally (user input); never moves on its own.
    Local,
    /// Placeholder shown while waiting for the first chunk.
    Loading,
    /// Receiving streamed content.
    Updating,
    Success,
    Error,
    /// The request was cancelled by the caller.
    Abort,
}

/// Error type for invalid status transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid message status transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: MessageStatus,
    pub to: MessageStatus,
}

impl MessageStatus {
    /// Settled states: no further updates are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Abort)
    }

    /// States that must never be left behind once a request settles.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Loading | Self::Updating)
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;

        match (self, next) {
            (Loading, Loading | Updating | Success | Error | Abort) => true,
            (Updating, Updating | Success | Error | Abort) => true,
            // Explicit reload of an existing message.
            (Local | Success | Error | Abort, Loading | Updating) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning the new status.
    pub fn transition(self, next: MessageStatus) -> Result<MessageStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}
