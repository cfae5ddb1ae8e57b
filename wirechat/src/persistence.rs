//! Persistence seam.
//!
//! The core never owns durable storage — it talks to an external REST-like
//! API through the [`Persistence`] trait and reconciles its optimistic
//! cache against the confirmed results. [`InMemoryPersistence`] is the
//! test double: it assigns `m100`, `m101`, ... ids and can be scripted to
//! fail or stall individual operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use wirechat_proto::ids::{ConversationId, MessageId};
use wirechat_proto::message::{Message, Reaction};

/// Errors returned by the persistence collaborator.
///
/// The core applies no retry beyond what the dispatcher documents: a
/// failed send marks the message `Failed` and waits for the user to
/// resubmit.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    /// The API rejected the request.
    #[error("persistence request rejected: {0}")]
    Rejected(String),
    /// The API could not be reached.
    #[error("persistence endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Confirmation returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// The server-assigned message id.
    pub message_id: String,
}

/// External message persistence API.
///
/// All operations are fallible and asynchronous; implementations wrap
/// whatever REST client the embedding application uses.
pub trait Persistence: Send + Sync + 'static {
    /// Persists an outgoing message, returning the server-assigned id.
    fn send_message(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<SendReceipt, PersistenceError>> + Send;

    /// Deletes a message.
    fn delete_message(
        &self,
        message_id: &MessageId,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Records a reaction on a message.
    fn react_to_message(
        &self,
        message_id: &MessageId,
        reaction: &Reaction,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Fetches the persisted history of a conversation.
    fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>, PersistenceError>> + Send;
}

impl<P: Persistence> Persistence for Arc<P> {
    fn send_message(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<SendReceipt, PersistenceError>> + Send {
        (**self).send_message(message)
    }

    fn delete_message(
        &self,
        message_id: &MessageId,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        (**self).delete_message(message_id)
    }

    fn react_to_message(
        &self,
        message_id: &MessageId,
        reaction: &Reaction,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        (**self).react_to_message(message_id, reaction)
    }

    fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>, PersistenceError>> + Send {
        (**self).fetch_history(conversation_id)
    }
}

/// Scriptable in-memory [`Persistence`] double for tests.
///
/// Server ids count up from `m100`. Failure flags apply to all subsequent
/// calls of the matching operation until cleared; `set_latency` makes
/// every operation sleep first, so tests can observe optimistic state
/// before confirmation lands (pair with paused tokio time).
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    next_id: AtomicU64,
    fail_sends: AtomicBool,
    fail_deletes: AtomicBool,
    fail_reactions: AtomicBool,
    latency: Mutex<Option<Duration>>,
    sent: Mutex<Vec<Message>>,
    deleted: Mutex<Vec<MessageId>>,
    reactions: Mutex<Vec<(MessageId, Reaction)>>,
    history: Mutex<Vec<Message>>,
}

impl InMemoryPersistence {
    /// Creates an empty double with ids starting at `m100`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            ..Self::default()
        }
    }

    /// Makes all subsequent sends fail (or succeed again).
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Makes all subsequent deletes fail (or succeed again).
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Makes all subsequent reactions fail (or succeed again).
    pub fn set_fail_reactions(&self, fail: bool) {
        self.fail_reactions.store(fail, Ordering::SeqCst);
    }

    /// Adds artificial latency in front of every operation.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Seeds the history returned by `fetch_history`.
    pub fn seed_history(&self, messages: Vec<Message>) {
        *self.history.lock() = messages;
    }

    /// Messages successfully persisted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Message ids successfully deleted so far.
    #[must_use]
    pub fn deleted(&self) -> Vec<MessageId> {
        self.deleted.lock().clone()
    }

    /// Reactions successfully recorded so far.
    #[must_use]
    pub fn reactions(&self) -> Vec<(MessageId, Reaction)> {
        self.reactions.lock().clone()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Persistence for InMemoryPersistence {
    async fn send_message(&self, message: &Message) -> Result<SendReceipt, PersistenceError> {
        self.simulate_latency().await;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("send refused".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push(message.clone());
        Ok(SendReceipt {
            message_id: format!("m{id}"),
        })
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), PersistenceError> {
        self.simulate_latency().await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("delete refused".to_string()));
        }
        self.deleted.lock().push(message_id.clone());
        Ok(())
    }

    async fn react_to_message(
        &self,
        message_id: &MessageId,
        reaction: &Reaction,
    ) -> Result<(), PersistenceError> {
        self.simulate_latency().await;
        if self.fail_reactions.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("react refused".to_string()));
        }
        self.reactions
            .lock()
            .push((message_id.clone(), reaction.clone()));
        Ok(())
    }

    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, PersistenceError> {
        self.simulate_latency().await;
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
