//! Delivery status lattice.
//!
//! [`DeliveryStatus::can_transition`] is the single transition authority:
//! the conversation store and the dispatcher both consult it before
//! mutating a message's status, so no component can apply a transition
//! another would reject.

use serde::{Deserialize, Serialize};

/// Delivery lifecycle of a message.
///
/// Normal transitions only move forward (`Sent -> Delivered -> Read`,
/// forward skips allowed). `Failed` is reachable from `Sent` only and is
/// terminal; `Read` is terminal. A message that is `Read` can never
/// regress to `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Accepted locally and handed to the network.
    Sent,
    /// Confirmed delivered to the recipient.
    Delivered,
    /// Confirmed read by the recipient.
    Read,
    /// Persistence rejected the message; requires an explicit resend.
    Failed,
}

impl DeliveryStatus {
    /// Position of a status on the forward axis of the lattice.
    const fn rank(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
            // Failed sits off the forward axis; handled explicitly.
            Self::Failed => 3,
        }
    }

    /// Returns `true` if the transition `self -> to` is legal.
    ///
    /// Backward moves and self-moves are never legal, and nothing leaves
    /// a terminal status.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            // Failure is only reachable from Sent.
            (Self::Sent, Self::Failed) => true,
            (_, Self::Failed) | (Self::Failed, _) => false,
            (from, to) => from.rank() < to.rank(),
        }
    }

    /// Returns `true` if no further transitions can leave this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
