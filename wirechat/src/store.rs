//! In-memory conversation store with optimistic-state reconciliation.
//!
//! One ordered message log per conversation, keyed by `(sent_at,
//! insertion order)`. The store formalizes the temp-id → server-id rename
//! as [`ConversationStore::reconcile`]: the entry keeps its position and
//! user-visible fields, and an alias record collapses later events that
//! still carry the old id.
//!
//! Locking: an outer read-write lock over the conversation map, one mutex
//! per conversation log. The transport event path and the send path
//! exclude each other per conversation while different conversations
//! proceed fully in parallel. All mutations are synchronous and never
//! touch I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use wirechat_proto::delivery::DeliveryStatus;
use wirechat_proto::ids::{ConversationId, MessageId};
use wirechat_proto::message::{Message, Reaction};

/// Result of an [`append`](ConversationStore::append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was inserted.
    Inserted,
    /// A message with this id (or the id it reconciled to) already
    /// exists; nothing changed.
    Duplicate,
}

/// Result of an [`update_status`](ConversationStore::update_status).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The transition was applied.
    Applied,
    /// The transition was illegal and dropped. Usually a duplicate or
    /// out-of-order event from the at-least-once channel, not a fault.
    Rejected {
        /// The status the message already had.
        current: DeliveryStatus,
    },
    /// No such message in this conversation.
    NotFound,
}

#[derive(Default)]
struct ConversationLog {
    /// Messages ordered by `(sent_at, insertion order)` — ties keep
    /// insertion order because new entries go after existing equals.
    messages: Vec<Message>,
    /// Collapses events that still carry a reconciled-away id.
    aliases: HashMap<MessageId, MessageId>,
    /// The local user's read cursor.
    last_seen: Option<MessageId>,
}

impl ConversationLog {
    /// Resolves an id through the alias table.
    fn resolve<'a>(&'a self, id: &'a MessageId) -> &'a MessageId {
        self.aliases.get(id).unwrap_or(id)
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        let live = self.resolve(id).clone();
        self.messages.iter().position(|m| m.id == live)
    }

    fn insert_sorted(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.messages.insert(at, message);
    }
}

/// Per-session in-memory message cache.
///
/// The store exclusively owns `Message` values once inserted; callers
/// hold ids and read through snapshots or the borrowed view.
#[derive(Default)]
pub struct ConversationStore {
    logs: RwLock<HashMap<ConversationId, Arc<Mutex<ConversationLog>>>>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, conversation_id: &ConversationId) -> Arc<Mutex<ConversationLog>> {
        if let Some(log) = self.logs.read().get(conversation_id) {
            return Arc::clone(log);
        }
        let mut logs = self.logs.write();
        Arc::clone(logs.entry(conversation_id.clone()).or_default())
    }

    /// Inserts a message at its sorted position.
    ///
    /// Idempotent: if a message with the same id — or with the final id
    /// the given id was reconciled to — already exists, nothing changes.
    pub fn append(&self, message: Message) -> AppendOutcome {
        let log = self.log(&message.conversation_id);
        let mut log = log.lock();
        if log.position_of(&message.id).is_some() {
            tracing::debug!(message_id = %message.id, "append dropped: id already present");
            return AppendOutcome::Duplicate;
        }
        log.insert_sorted(message);
        AppendOutcome::Inserted
    }

    /// Renames `temp_id` to `final_id` in place.
    ///
    /// Position and user-visible fields are untouched; the alias is
    /// recorded so later events bearing `temp_id` update rather than
    /// duplicate. Unknown `temp_id` (already reconciled, or evicted) is
    /// logged and ignored — never fatal. Returns whether a rename
    /// happened.
    pub fn reconcile(
        &self,
        conversation_id: &ConversationId,
        temp_id: &MessageId,
        final_id: MessageId,
    ) -> bool {
        let log = self.log(conversation_id);
        let mut log = log.lock();

        if log.messages.iter().any(|m| m.id == final_id) {
            // The final id beat us here (history merge racing the send
            // confirmation). Collapse the temp entry instead of leaving
            // two rows for one message.
            if let Some(at) = log.messages.iter().position(|m| m.id == *temp_id) {
                log.messages.remove(at);
            }
            log.aliases.insert(temp_id.clone(), final_id.clone());
            tracing::debug!(
                final_id = %final_id,
                "reconcile collapsed temp entry: final id already present"
            );
            return false;
        }
        let Some(at) = log.messages.iter().position(|m| m.id == *temp_id) else {
            tracing::debug!(
                temp_id = %temp_id,
                final_id = %final_id,
                "reconcile skipped: temp id not found"
            );
            return false;
        };

        log.messages[at].id = final_id.clone();
        if log.last_seen.as_ref() == Some(temp_id) {
            log.last_seen = Some(final_id.clone());
        }
        log.aliases.insert(temp_id.clone(), final_id);
        true
    }

    /// Removes a message, returning it (for compensating re-insertion).
    pub fn remove(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Option<Message> {
        let log = self.log(conversation_id);
        let mut log = log.lock();
        let at = log.position_of(message_id)?;
        Some(log.messages.remove(at))
    }

    /// Advances a message's delivery status through the lattice.
    ///
    /// Illegal transitions are dropped, not applied — they typically mean
    /// a duplicate or out-of-order event, and the caller treats them as a
    /// non-fatal anomaly.
    pub fn update_status(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        status: DeliveryStatus,
    ) -> StatusOutcome {
        let log = self.log(conversation_id);
        let mut log = log.lock();
        let Some(at) = log.position_of(message_id) else {
            return StatusOutcome::NotFound;
        };
        let current = log.messages[at].status;
        if !current.can_transition(status) {
            tracing::warn!(
                message_id = %message_id,
                from = %current,
                to = %status,
                "invalid status transition dropped"
            );
            return StatusOutcome::Rejected { current };
        }
        log.messages[at].status = status;
        StatusOutcome::Applied
    }

    /// Attaches a reaction to a message. Returns `false` if the message
    /// is unknown.
    pub fn add_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        reaction: Reaction,
    ) -> bool {
        let log = self.log(conversation_id);
        let mut log = log.lock();
        let Some(at) = log.position_of(message_id) else {
            return false;
        };
        log.messages[at].reactions.push(reaction);
        true
    }

    /// Removes one reaction equal to `reaction` from a message (used by
    /// the compensating rollback). Returns whether one was removed.
    pub fn remove_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        reaction: &Reaction,
    ) -> bool {
        let log = self.log(conversation_id);
        let mut log = log.lock();
        let Some(at) = log.position_of(message_id) else {
            return false;
        };
        let reactions = &mut log.messages[at].reactions;
        if let Some(found) = reactions.iter().position(|r| r == reaction) {
            reactions.remove(found);
            return true;
        }
        false
    }

    /// Moves the local user's read cursor.
    pub fn mark_seen(&self, conversation_id: &ConversationId, message_id: &MessageId) {
        let log = self.log(conversation_id);
        let mut log = log.lock();
        let live = log.resolve(message_id).clone();
        log.last_seen = Some(live);
    }

    /// The local user's read cursor, if set.
    #[must_use]
    pub fn last_seen(&self, conversation_id: &ConversationId) -> Option<MessageId> {
        let log = self.log(conversation_id);
        let log = log.lock();
        log.last_seen.clone()
    }

    /// Looks up a single message by id (resolving aliases).
    #[must_use]
    pub fn message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Option<Message> {
        let log = self.log(conversation_id);
        let log = log.lock();
        let at = log.position_of(message_id)?;
        Some(log.messages[at].clone())
    }

    /// Runs `f` over the ordered log without copying it.
    ///
    /// The slice is a stable view for this single pass only — appends
    /// from other tasks during the call wait on the conversation lock
    /// and are not visible within the pass.
    pub fn with_messages<R>(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&[Message]) -> R,
    ) -> R {
        let log = self.log(conversation_id);
        let log = log.lock();
        f(&log.messages)
    }

    /// Clones the ordered log (snapshot-at-call).
    #[must_use]
    pub fn snapshot(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.with_messages(conversation_id, <[Message]>::to_vec)
    }

    /// Number of messages currently held for a conversation.
    #[must_use]
    pub fn len(&self, conversation_id: &ConversationId) -> usize {
        self.with_messages(conversation_id, <[Message]>::len)
    }

    /// Returns `true` if the conversation holds no messages.
    #[must_use]
    pub fn is_empty(&self, conversation_id: &ConversationId) -> bool {
        self.len(conversation_id) == 0
    }
}
