//! Realtime event taxonomy and session frames.
//!
//! [`WireEvent`] is the fixed set of events the transport can deliver.
//! [`ClientFrame`] / [`ServerFrame`] wrap the auth handshake and event
//! routing: a client authenticates with [`ClientFrame::Auth`], then
//! publishes events addressed to other users; the gateway forwards each
//! one as a [`ServerFrame::Event`]. Delivery is at-least-once — consumers
//! must tolerate duplicates.

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryStatus;
use crate::ids::{ConversationId, MessageId, UserId};
use crate::message::{Message, Reaction};

/// A realtime event, always scoped to one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireEvent {
    /// A new message arrived in a conversation.
    MessageReceived {
        /// The message, content still in wire (encoded) form.
        message: Message,
    },
    /// A peer started typing.
    TypingStarted {
        /// The conversation being typed into.
        conversation_id: ConversationId,
        /// The typing peer.
        user_id: UserId,
    },
    /// A peer explicitly stopped typing.
    TypingStopped {
        /// The conversation.
        conversation_id: ConversationId,
        /// The peer.
        user_id: UserId,
    },
    /// A message was deleted.
    MessageDeleted {
        /// The conversation.
        conversation_id: ConversationId,
        /// The deleted message.
        message_id: MessageId,
    },
    /// A reaction was added to a message.
    MessageReaction {
        /// The conversation.
        conversation_id: ConversationId,
        /// The message reacted to.
        message_id: MessageId,
        /// The reaction.
        reaction: Reaction,
    },
    /// A member joined a conversation (also serves as the online signal).
    MemberJoined {
        /// The conversation.
        conversation_id: ConversationId,
        /// The member.
        user_id: UserId,
    },
    /// A member left a conversation (also serves as the offline signal).
    MemberLeft {
        /// The conversation.
        conversation_id: ConversationId,
        /// The member.
        user_id: UserId,
    },
    /// A message's delivery status advanced.
    StatusUpdated {
        /// The conversation.
        conversation_id: ConversationId,
        /// The message.
        message_id: MessageId,
        /// The new status.
        status: DeliveryStatus,
    },
}

impl WireEvent {
    /// Returns the conversation this event is scoped to.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::MessageReceived { message } => &message.conversation_id,
            Self::TypingStarted {
                conversation_id, ..
            }
            | Self::TypingStopped {
                conversation_id, ..
            }
            | Self::MessageDeleted {
                conversation_id, ..
            }
            | Self::MessageReaction {
                conversation_id, ..
            }
            | Self::MemberJoined {
                conversation_id, ..
            }
            | Self::MemberLeft {
                conversation_id, ..
            }
            | Self::StatusUpdated {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Frames sent from a client to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Authentication handshake; must be the first frame on a connection.
    Auth {
        /// The authenticating user.
        user_id: UserId,
        /// Session token, validated by the gateway.
        token: String,
    },
    /// Publish an event to a set of users.
    Publish {
        /// Recipients; the gateway routes one copy to each connected
        /// recipient and drops the rest.
        to: Vec<UserId>,
        /// The event to deliver.
        event: WireEvent,
    },
}

/// An event as routed to a recipient, stamped with its attested sender.
///
/// The gateway overwrites `from` with the authenticated session user, so
/// a client cannot publish on another user's behalf. Receivers use it to
/// re-scope direct-chat conversation ids, which each side names after
/// its own peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedEvent {
    /// The authenticated user the event came from.
    pub from: UserId,
    /// The event itself.
    pub event: WireEvent,
}

/// Frames sent from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// The auth handshake succeeded.
    AuthOk {
        /// Echo of the authenticated user.
        user_id: UserId,
    },
    /// The auth handshake was rejected; the connection will be closed.
    AuthRejected {
        /// Human-readable rejection reason.
        reason: String,
    },
    /// An event published by some peer.
    Event(RoutedEvent),
    /// A non-fatal protocol error.
    Error {
        /// Human-readable description.
        reason: String,
    },
}
