//! Identifier types for users, conversations, and messages.
//!
//! Conversations live in three id namespaces (direct chats, groups, and
//! community channels), modeled as a tagged union so a direct-chat id can
//! never be confused with a group id. Message ids are likewise a tagged
//! union of the client-generated placeholder and the server-assigned final
//! id, which makes reconciliation an explicit, typed operation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies an authenticated user.
///
/// Opaque string issued by the (external) auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this user id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation in one of three id namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationId {
    /// A one-to-one chat, identified by the remote peer.
    Direct(UserId),
    /// A group chat.
    Group(String),
    /// A community channel.
    Channel(String),
}

impl ConversationId {
    /// Creates a direct-chat conversation id for the given peer.
    pub fn direct(peer: impl Into<String>) -> Self {
        Self::Direct(UserId::new(peer))
    }

    /// Creates a group conversation id.
    pub fn group(id: impl Into<String>) -> Self {
        Self::Group(id.into())
    }

    /// Creates a community channel conversation id.
    pub fn channel(id: impl Into<String>) -> Self {
        Self::Channel(id.into())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(peer) => write!(f, "direct:{peer}"),
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Channel(id) => write!(f, "channel:{id}"),
        }
    }
}

/// Identifies a message.
///
/// A message is created under a client-generated [`MessageId::Local`]
/// placeholder and renamed to the server-assigned [`MessageId::Server`] id
/// once persistence confirms it. Exactly one of the two forms is the live
/// id of a message at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    /// Client-generated placeholder (UUID v7 for time-ordering).
    Local(Uuid),
    /// Server-assigned identifier, authoritative once known.
    Server(String),
}

impl MessageId {
    /// Creates a fresh client-local placeholder id.
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(Uuid::now_v7())
    }

    /// Creates a server-assigned id from its string form.
    pub fn server(id: impl Into<String>) -> Self {
        Self::Server(id.into())
    }

    /// Returns `true` if this is a client-local placeholder id.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(uuid) => write!(f, "local:{uuid}"),
            Self::Server(id) => write!(f, "{id}"),
        }
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns this timestamp advanced by `millis`, saturating on overflow.
    #[must_use]
    pub const fn saturating_add_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
