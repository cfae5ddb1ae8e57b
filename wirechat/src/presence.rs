//! Presence and typing state per (conversation, peer).
//!
//! Typing is a short-lived state: `typing_started` arms (or extends) a
//! TTL, `typing_stopped` or expiry returns the peer to idle. Expiry is
//! enforced twice — lazily on every read, and eagerly by the dispatcher's
//! periodic sweep — so a `typing_until` in the past is never observable
//! as "typing". Online/offline is last-event-wins with no buffering.
//!
//! Mutations report whether observable state changed, letting the caller
//! emit exactly one event per real change: a repeat `typing_started`
//! extends the TTL silently.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use wirechat_proto::ids::{ConversationId, UserId};

/// Default typing TTL; re-exported through the core config.
pub const TYPING_TTL: Duration = Duration::from_secs(2);

/// Observable presence of one peer in one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerPresence {
    /// Whether the peer is online in this conversation.
    pub online: bool,
    /// Whether the peer is currently typing (TTL already applied).
    pub typing: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct PresenceEntry {
    online: bool,
    typing_until: Option<Instant>,
}

impl PresenceEntry {
    fn typing_at(&self, now: Instant) -> bool {
        // Defensive: a deadline in the past means idle, regardless of
        // whether the sweep has run yet.
        self.typing_until.is_some_and(|until| until > now)
    }

    const fn is_default(&self) -> bool {
        !self.online && self.typing_until.is_none()
    }
}

/// Tracks presence and typing for all peers across conversations.
///
/// Exactly one entry exists per (conversation, peer); entries that decay
/// to offline-and-idle are dropped.
pub struct PresenceTracker {
    ttl: Duration,
    entries: Mutex<HashMap<(ConversationId, UserId), PresenceEntry>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(TYPING_TTL)
    }
}

impl PresenceTracker {
    /// Creates a tracker with the given typing TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The configured typing TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records a typing signal, arming or extending the TTL.
    ///
    /// Returns `true` only on the idle → typing transition; refreshes
    /// return `false` so no duplicate event is emitted.
    pub fn typing_started(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry((conversation_id.clone(), user_id.clone()))
            .or_default();
        let was_typing = entry.typing_at(now);
        entry.typing_until = Some(now + self.ttl);
        !was_typing
    }

    /// Records an explicit stop-typing signal.
    ///
    /// Returns `true` only if the peer was observably typing.
    pub fn typing_stopped(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let key = (conversation_id.clone(), user_id.clone());
        let Some(entry) = entries.get_mut(&key) else {
            return false;
        };
        let was_typing = entry.typing_at(now);
        entry.typing_until = None;
        if entry.is_default() {
            entries.remove(&key);
        }
        was_typing
    }

    /// Flips a peer's online flag (last event wins).
    ///
    /// Going offline also clears any typing state. Returns `true` if the
    /// online flag actually changed.
    pub fn set_online(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        online: bool,
    ) -> bool {
        let mut entries = self.entries.lock();
        let key = (conversation_id.clone(), user_id.clone());
        let entry = entries.entry(key.clone()).or_default();
        let changed = entry.online != online;
        entry.online = online;
        if !online {
            entry.typing_until = None;
        }
        if entry.is_default() {
            entries.remove(&key);
        }
        changed
    }

    /// Whether the peer is typing right now (lazy TTL check).
    #[must_use]
    pub fn is_typing(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(&(conversation_id.clone(), user_id.clone()))
            .is_some_and(|entry| entry.typing_at(now))
    }

    /// Observable presence of a peer (lazy TTL check).
    #[must_use]
    pub fn presence(&self, conversation_id: &ConversationId, user_id: &UserId) -> PeerPresence {
        let now = Instant::now();
        self.entries
            .lock()
            .get(&(conversation_id.clone(), user_id.clone()))
            .map_or_else(PeerPresence::default, |entry| PeerPresence {
                online: entry.online,
                typing: entry.typing_at(now),
            })
    }

    /// Peers currently typing in a conversation.
    #[must_use]
    pub fn typing_peers(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|((conv, _), entry)| conv == conversation_id && entry.typing_at(now))
            .map(|((_, user), _)| user.clone())
            .collect()
    }

    /// Online members of a conversation.
    ///
    /// Doubles as the realtime fan-out roster for group and channel
    /// conversations.
    #[must_use]
    pub fn online_members(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        self.entries
            .lock()
            .iter()
            .filter(|((conv, _), entry)| conv == conversation_id && entry.online)
            .map(|((_, user), _)| user.clone())
            .collect()
    }

    /// Expires stale typing entries eagerly.
    ///
    /// Returns the (conversation, peer) pairs that transitioned typing →
    /// idle, so the caller can notify subscribers. Run by the dispatcher
    /// at TTL granularity.
    pub fn sweep(&self) -> Vec<(ConversationId, UserId)> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut entries = self.entries.lock();
        entries.retain(|key, entry| {
            if entry.typing_until.is_some() && !entry.typing_at(now) {
                entry.typing_until = None;
                expired.push(key.clone());
            }
            !entry.is_default()
        });
        expired
    }
}
