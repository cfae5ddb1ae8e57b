//! Dispatcher: the façade over the messaging core.
//!
//! Accepts send/delete/react intents, coordinates with the persistence
//! collaborator, keeps the conversation store optimistic-but-reconciled,
//! routes inbound transport events into the store and trackers, and fans
//! merged change events out to subscribers.
//!
//! The optimistic send pipeline: validate → insert with a temp id and
//! status `Sent` (the caller sees the message immediately) → persist in
//! the background → on success rename temp → server id and notify peers;
//! on failure mark the message `Failed` and wait for an explicit resend.
//! A dispatched persistence call always runs to completion — there is no
//! caller-side cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use wirechat_proto::delivery::DeliveryStatus;
use wirechat_proto::event::{RoutedEvent, WireEvent};
use wirechat_proto::ids::{ConversationId, MessageId, Timestamp, UserId};
use wirechat_proto::message::{
    Message, MessageDraft, Reaction, ValidationError, validate_content,
};

use crate::codec::{ContentCodec, UNAVAILABLE_CONTENT};
use crate::config::CoreConfig;
use crate::connection::ConnectionHandle;
use crate::persistence::{Persistence, PersistenceError};
use crate::presence::PresenceTracker;
use crate::store::{AppendOutcome, ConversationStore, StatusOutcome};
use crate::transport::TransportError;

/// A change observed by the core, tagged with its conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A message entered the store (optimistic send, inbound event, or
    /// history merge).
    MessageAppended {
        /// The conversation.
        conversation_id: ConversationId,
        /// The appended message.
        message: Message,
    },
    /// A message changed in place (reconciled id, reaction change).
    MessageUpdated {
        /// The conversation.
        conversation_id: ConversationId,
        /// The message after the change.
        message: Message,
    },
    /// A message left the store (delete or self-destruct).
    MessageRemoved {
        /// The conversation.
        conversation_id: ConversationId,
        /// The removed message's id.
        message_id: MessageId,
    },
    /// A message's delivery status advanced.
    DeliveryChanged {
        /// The conversation.
        conversation_id: ConversationId,
        /// The message.
        message_id: MessageId,
        /// The new status.
        status: DeliveryStatus,
    },
    /// A peer's online flag flipped.
    PresenceChanged {
        /// The conversation.
        conversation_id: ConversationId,
        /// The peer.
        user_id: UserId,
        /// The new online state.
        online: bool,
    },
    /// A peer started or stopped typing.
    TypingChanged {
        /// The conversation.
        conversation_id: ConversationId,
        /// The peer.
        user_id: UserId,
        /// The new typing state.
        typing: bool,
    },
}

/// Errors surfaced by dispatcher intents.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The draft failed validation.
    #[error("message validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The referenced message is not in the store.
    #[error("message {0} not found")]
    NotFound(MessageId),

    /// The connection session has shut down.
    #[error("transport unavailable: {0}")]
    Transport(#[from] TransportError),
}

/// The façade over connection, store, presence, and persistence.
///
/// One dispatcher is built per authenticated session, on top of that
/// session's [`ConnectionHandle`]. Dropping it stops the routing and
/// sweep tasks.
pub struct Dispatcher<P: Persistence, C: ContentCodec> {
    user_id: UserId,
    connection: ConnectionHandle,
    persistence: Arc<P>,
    codec: Arc<C>,
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    fan: Arc<EventFan>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl<P: Persistence, C: ContentCodec> Dispatcher<P, C> {
    /// Builds a dispatcher over a live connection and spawns its inbound
    /// routing task and the typing-expiry sweeper.
    #[must_use]
    pub fn new(connection: ConnectionHandle, persistence: P, codec: C, config: &CoreConfig) -> Self {
        let user_id = connection.user_id().clone();
        let store = Arc::new(ConversationStore::new());
        let presence = Arc::new(PresenceTracker::new(config.typing_ttl));
        let fan = Arc::new(EventFan::new(
            config.event_buffer,
            config.dedup_window,
            config.dedup_max_entries,
        ));

        let router = Router {
            user_id: user_id.clone(),
            store: Arc::clone(&store),
            presence: Arc::clone(&presence),
            codec: Arc::new(codec),
            fan: Arc::clone(&fan),
        };
        let codec = Arc::clone(&router.codec);

        let router_task = tokio::spawn(route_loop(connection.subscribe(), router));
        let sweeper_task = tokio::spawn(sweep_loop(
            Arc::clone(&presence),
            Arc::clone(&fan),
            config.typing_ttl,
        ));

        Self {
            user_id,
            connection,
            persistence: Arc::new(persistence),
            codec,
            store,
            presence,
            fan,
            tasks: vec![router_task, sweeper_task],
        }
    }

    /// Subscribes to the merged, deduplicated change stream.
    ///
    /// Every subscriber gets its own channel; slow subscribers drop
    /// events rather than stall the core.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<CoreEvent> {
        self.fan.subscribe()
    }

    /// Snapshot-at-call of a conversation's ordered log.
    #[must_use]
    pub fn conversation(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.store.snapshot(conversation_id)
    }

    /// The conversation store (shared with the routing task).
    #[must_use]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// The presence tracker (shared with the routing task).
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    /// The connection handle this dispatcher publishes through.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Sends a message optimistically.
    ///
    /// Returns the temporary message as soon as it is inserted — the
    /// persistence call continues in the background and always runs to
    /// completion. On success the entry is reconciled to the server id
    /// and peers are notified; on failure its status becomes `Failed`
    /// with no automatic retry (resubmitting is a fresh send).
    ///
    /// # Errors
    ///
    /// [`DispatchError::Validation`] if the draft content is empty or
    /// oversized.
    pub fn send_message(
        &self,
        conversation_id: ConversationId,
        draft: MessageDraft,
    ) -> Result<Message, DispatchError> {
        validate_content(&draft.content)?;

        let now = Timestamp::now();
        let message = Message {
            id: MessageId::new_local(),
            conversation_id: conversation_id.clone(),
            sender_id: self.user_id.clone(),
            content: draft.content.clone(),
            kind: draft.kind,
            sent_at: now,
            status: DeliveryStatus::Sent,
            reply_to: draft.reply_to,
            reactions: Vec::new(),
            self_destruct_at: draft
                .self_destruct_secs
                .map(|secs| now.saturating_add_millis(secs.saturating_mul(1000))),
            code_language: draft.code_language,
            code_filename: draft.code_filename,
        };

        self.store.append(message.clone());
        self.fan.emit(CoreEvent::MessageAppended {
            conversation_id: conversation_id.clone(),
            message: message.clone(),
        });
        if let Some(at) = message.self_destruct_at {
            arm_self_destruct(
                Arc::clone(&self.store),
                Arc::clone(&self.fan),
                conversation_id.clone(),
                message.id.clone(),
                at,
            );
        }

        let mut outbound = message.clone();
        outbound.content = self.codec.encode(&draft.content);

        let persistence = Arc::clone(&self.persistence);
        let store = Arc::clone(&self.store);
        let fan = Arc::clone(&self.fan);
        let presence = Arc::clone(&self.presence);
        let connection = self.connection.clone();
        let self_user = self.user_id.clone();
        let temp_id = message.id.clone();

        tokio::spawn(async move {
            match persistence.send_message(&outbound).await {
                Ok(receipt) => {
                    let final_id = MessageId::server(receipt.message_id);
                    if store.reconcile(&conversation_id, &temp_id, final_id.clone())
                        && let Some(confirmed) = store.message(&conversation_id, &final_id)
                    {
                        fan.emit(CoreEvent::MessageUpdated {
                            conversation_id: conversation_id.clone(),
                            message: confirmed,
                        });
                    }

                    let recipients = recipients_for(&conversation_id, &presence, &self_user);
                    if recipients.is_empty() {
                        return;
                    }
                    let mut wire = outbound;
                    wire.id = final_id;
                    if let Err(err) = connection
                        .publish(recipients, WireEvent::MessageReceived { message: wire })
                        .await
                    {
                        tracing::warn!(err = %err, "peer notification failed after send");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        message_id = %temp_id,
                        err = %err,
                        "persistence send failed, marking message failed"
                    );
                    if store.update_status(&conversation_id, &temp_id, DeliveryStatus::Failed)
                        == StatusOutcome::Applied
                    {
                        fan.emit(CoreEvent::DeliveryChanged {
                            conversation_id,
                            message_id: temp_id,
                            status: DeliveryStatus::Failed,
                        });
                    }
                }
            }
        });

        Ok(message)
    }

    /// Deletes a message optimistically, re-inserting it if persistence
    /// rejects the delete.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotFound`] if the message is not in the store.
    pub fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), DispatchError> {
        let removed = self
            .store
            .remove(conversation_id, message_id)
            .ok_or_else(|| DispatchError::NotFound(message_id.clone()))?;

        self.fan.emit(CoreEvent::MessageRemoved {
            conversation_id: conversation_id.clone(),
            message_id: removed.id.clone(),
        });

        let persistence = Arc::clone(&self.persistence);
        let store = Arc::clone(&self.store);
        let fan = Arc::clone(&self.fan);
        let presence = Arc::clone(&self.presence);
        let connection = self.connection.clone();
        let self_user = self.user_id.clone();
        let conversation_id = conversation_id.clone();

        tokio::spawn(async move {
            match persistence.delete_message(&removed.id).await {
                Ok(()) => {
                    let recipients = recipients_for(&conversation_id, &presence, &self_user);
                    if recipients.is_empty() {
                        return;
                    }
                    let event = WireEvent::MessageDeleted {
                        conversation_id: conversation_id.clone(),
                        message_id: removed.id.clone(),
                    };
                    if let Err(err) = connection.publish(recipients, event).await {
                        tracing::warn!(err = %err, "peer notification failed after delete");
                    }
                }
                Err(err) => {
                    // Compensating rollback: the message never left the
                    // server, so it comes back locally too.
                    tracing::warn!(
                        message_id = %removed.id,
                        err = %err,
                        "persistence delete failed, restoring message"
                    );
                    if store.append(removed.clone()) == AppendOutcome::Inserted {
                        fan.emit(CoreEvent::MessageAppended {
                            conversation_id,
                            message: removed,
                        });
                    }
                }
            }
        });

        Ok(())
    }

    /// Adds a reaction optimistically, reverting it if persistence
    /// rejects the call.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotFound`] if the message is not in the store.
    pub fn react_to_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        emoji: impl Into<String>,
    ) -> Result<(), DispatchError> {
        let reaction = Reaction {
            emoji: emoji.into(),
            user: self.user_id.clone(),
        };
        if !self
            .store
            .add_reaction(conversation_id, message_id, reaction.clone())
        {
            return Err(DispatchError::NotFound(message_id.clone()));
        }
        let Some(reacted) = self.store.message(conversation_id, message_id) else {
            return Err(DispatchError::NotFound(message_id.clone()));
        };
        let live_id = reacted.id.clone();
        self.fan.emit(CoreEvent::MessageUpdated {
            conversation_id: conversation_id.clone(),
            message: reacted,
        });

        let persistence = Arc::clone(&self.persistence);
        let store = Arc::clone(&self.store);
        let fan = Arc::clone(&self.fan);
        let presence = Arc::clone(&self.presence);
        let connection = self.connection.clone();
        let self_user = self.user_id.clone();
        let conversation_id = conversation_id.clone();

        tokio::spawn(async move {
            match persistence.react_to_message(&live_id, &reaction).await {
                Ok(()) => {
                    let recipients = recipients_for(&conversation_id, &presence, &self_user);
                    if recipients.is_empty() {
                        return;
                    }
                    let event = WireEvent::MessageReaction {
                        conversation_id: conversation_id.clone(),
                        message_id: live_id.clone(),
                        reaction,
                    };
                    if let Err(err) = connection.publish(recipients, event).await {
                        tracing::warn!(err = %err, "peer notification failed after reaction");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        message_id = %live_id,
                        err = %err,
                        "persistence reaction failed, reverting"
                    );
                    if store.remove_reaction(&conversation_id, &live_id, &reaction)
                        && let Some(reverted) = store.message(&conversation_id, &live_id)
                    {
                        fan.emit(CoreEvent::MessageUpdated {
                            conversation_id,
                            message: reverted,
                        });
                    }
                }
            }
        });

        Ok(())
    }

    /// Tells peers the local user started typing. Fire-and-forget; no
    /// persistence involved.
    pub async fn start_typing(&self, conversation_id: &ConversationId) {
        self.forward_typing(conversation_id, true).await;
    }

    /// Tells peers the local user stopped typing. Fire-and-forget.
    pub async fn stop_typing(&self, conversation_id: &ConversationId) {
        self.forward_typing(conversation_id, false).await;
    }

    async fn forward_typing(&self, conversation_id: &ConversationId, typing: bool) {
        let recipients = recipients_for(conversation_id, &self.presence, &self.user_id);
        if recipients.is_empty() {
            return;
        }
        let event = if typing {
            WireEvent::TypingStarted {
                conversation_id: conversation_id.clone(),
                user_id: self.user_id.clone(),
            }
        } else {
            WireEvent::TypingStopped {
                conversation_id: conversation_id.clone(),
                user_id: self.user_id.clone(),
            }
        };
        if let Err(err) = self.connection.publish(recipients, event).await {
            tracing::debug!(err = %err, "typing signal dropped");
        }
    }

    /// Fetches persisted history and merges it into the store.
    ///
    /// Existing entries win (idempotent append); returns how many
    /// messages were actually inserted. Content that fails to decode is
    /// kept with a placeholder.
    ///
    /// # Errors
    ///
    /// Propagates the persistence failure; the store is left as it was.
    pub async fn load_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<usize, PersistenceError> {
        let fetched = self.persistence.fetch_history(conversation_id).await?;
        let mut inserted = 0;
        for mut message in fetched {
            message.content = match self.codec.decode(&message.content) {
                Ok(plaintext) => plaintext,
                Err(err) => {
                    tracing::warn!(
                        message_id = %message.id,
                        err = %err,
                        "history content decode failed, using placeholder"
                    );
                    UNAVAILABLE_CONTENT.to_string()
                }
            };
            if self.store.append(message.clone()) == AppendOutcome::Inserted {
                inserted += 1;
                if let Some(at) = message.self_destruct_at {
                    arm_self_destruct(
                        Arc::clone(&self.store),
                        Arc::clone(&self.fan),
                        conversation_id.clone(),
                        message.id.clone(),
                        at,
                    );
                }
                self.fan.emit(CoreEvent::MessageAppended {
                    conversation_id: conversation_id.clone(),
                    message,
                });
            }
        }
        Ok(inserted)
    }

    /// Moves the local read cursor of a conversation.
    pub fn mark_seen(&self, conversation_id: &ConversationId, message_id: &MessageId) {
        self.store.mark_seen(conversation_id, message_id);
    }
}

impl<P: Persistence, C: ContentCodec> Drop for Dispatcher<P, C> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Recipients of a peer notification for a conversation.
///
/// Direct chats notify the peer in the id; groups and channels notify the
/// currently-online roster (offline members catch up via history).
fn recipients_for(
    conversation_id: &ConversationId,
    presence: &PresenceTracker,
    self_user: &UserId,
) -> Vec<UserId> {
    match conversation_id {
        ConversationId::Direct(peer) => {
            if peer == self_user {
                Vec::new()
            } else {
                vec![peer.clone()]
            }
        }
        ConversationId::Group(_) | ConversationId::Channel(_) => presence
            .online_members(conversation_id)
            .into_iter()
            .filter(|member| member != self_user)
            .collect(),
    }
}

/// Schedules the client-local removal of a self-destructing message.
///
/// This is a local countdown only — the server copy is unaffected, so it
/// is not a secrecy mechanism.
fn arm_self_destruct(
    store: Arc<ConversationStore>,
    fan: Arc<EventFan>,
    conversation_id: ConversationId,
    message_id: MessageId,
    at: Timestamp,
) {
    tokio::spawn(async move {
        let delay = at.as_millis().saturating_sub(Timestamp::now().as_millis());
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if let Some(removed) = store.remove(&conversation_id, &message_id) {
            tracing::debug!(message_id = %removed.id, "self-destruct expired");
            fan.emit(CoreEvent::MessageRemoved {
                conversation_id,
                message_id: removed.id,
            });
        }
    });
}

// ---------------------------------------------------------------------------
// Inbound routing
// ---------------------------------------------------------------------------

/// Routes inbound wire events into the store and trackers.
struct Router<C: ContentCodec> {
    user_id: UserId,
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    codec: Arc<C>,
    fan: Arc<EventFan>,
}

impl<C: ContentCodec> Router<C> {
    /// Re-scopes a direct-chat conversation id to the local naming.
    ///
    /// Each side of a direct chat names the conversation after its own
    /// peer, so an event scoped to "me" is filed under its attested
    /// sender instead.
    fn localize(&self, conversation_id: ConversationId, from: &UserId) -> ConversationId {
        match conversation_id {
            ConversationId::Direct(peer) if peer == self.user_id => {
                ConversationId::Direct(from.clone())
            }
            other => other,
        }
    }

    fn handle(&self, routed: RoutedEvent) {
        if !self.fan.admit(&routed.event) {
            tracing::debug!("duplicate inbound event absorbed");
            return;
        }
        let from = routed.from;

        match routed.event {
            WireEvent::MessageReceived { mut message } => {
                message.conversation_id = self.localize(message.conversation_id, &from);
                message.content = match self.codec.decode(&message.content) {
                    Ok(plaintext) => plaintext,
                    Err(err) => {
                        // Localized to this one message; never propagates.
                        tracing::warn!(
                            message_id = %message.id,
                            err = %err,
                            "inbound content decode failed, using placeholder"
                        );
                        UNAVAILABLE_CONTENT.to_string()
                    }
                };
                let conversation_id = message.conversation_id.clone();
                let destruct = message.self_destruct_at;
                let message_id = message.id.clone();
                if self.store.append(message.clone()) == AppendOutcome::Inserted {
                    if let Some(at) = destruct {
                        arm_self_destruct(
                            Arc::clone(&self.store),
                            Arc::clone(&self.fan),
                            conversation_id.clone(),
                            message_id,
                            at,
                        );
                    }
                    self.fan.emit(CoreEvent::MessageAppended {
                        conversation_id,
                        message,
                    });
                }
            }
            WireEvent::TypingStarted {
                conversation_id,
                user_id,
            } => {
                if user_id == self.user_id {
                    return;
                }
                let conversation_id = self.localize(conversation_id, &from);
                if self.presence.typing_started(&conversation_id, &user_id) {
                    self.fan.emit(CoreEvent::TypingChanged {
                        conversation_id,
                        user_id,
                        typing: true,
                    });
                }
            }
            WireEvent::TypingStopped {
                conversation_id,
                user_id,
            } => {
                if user_id == self.user_id {
                    return;
                }
                let conversation_id = self.localize(conversation_id, &from);
                if self.presence.typing_stopped(&conversation_id, &user_id) {
                    self.fan.emit(CoreEvent::TypingChanged {
                        conversation_id,
                        user_id,
                        typing: false,
                    });
                }
            }
            WireEvent::MessageDeleted {
                conversation_id,
                message_id,
            } => {
                let conversation_id = self.localize(conversation_id, &from);
                if let Some(removed) = self.store.remove(&conversation_id, &message_id) {
                    self.fan.emit(CoreEvent::MessageRemoved {
                        conversation_id,
                        message_id: removed.id,
                    });
                }
            }
            WireEvent::MessageReaction {
                conversation_id,
                message_id,
                reaction,
            } => {
                let conversation_id = self.localize(conversation_id, &from);
                if self
                    .store
                    .add_reaction(&conversation_id, &message_id, reaction)
                    && let Some(updated) = self.store.message(&conversation_id, &message_id)
                {
                    self.fan.emit(CoreEvent::MessageUpdated {
                        conversation_id,
                        message: updated,
                    });
                }
            }
            WireEvent::MemberJoined {
                conversation_id,
                user_id,
            } => {
                if user_id == self.user_id {
                    return;
                }
                let conversation_id = self.localize(conversation_id, &from);
                if self.presence.set_online(&conversation_id, &user_id, true) {
                    self.fan.emit(CoreEvent::PresenceChanged {
                        conversation_id,
                        user_id,
                        online: true,
                    });
                }
            }
            WireEvent::MemberLeft {
                conversation_id,
                user_id,
            } => {
                if user_id == self.user_id {
                    return;
                }
                let conversation_id = self.localize(conversation_id, &from);
                if self.presence.set_online(&conversation_id, &user_id, false) {
                    self.fan.emit(CoreEvent::PresenceChanged {
                        conversation_id,
                        user_id,
                        online: false,
                    });
                }
            }
            WireEvent::StatusUpdated {
                conversation_id,
                message_id,
                status,
            } => {
                let conversation_id = self.localize(conversation_id, &from);
                // Rejected transitions are logged by the store and
                // dropped here — duplicates and reorders from the
                // at-least-once channel are expected, not faults.
                if self.store.update_status(&conversation_id, &message_id, status)
                    == StatusOutcome::Applied
                {
                    self.fan.emit(CoreEvent::DeliveryChanged {
                        conversation_id,
                        message_id,
                        status,
                    });
                }
            }
        }
    }
}

/// Drains the connection bus into the router until the bus closes.
async fn route_loop<C: ContentCodec>(mut bus: broadcast::Receiver<RoutedEvent>, router: Router<C>) {
    loop {
        match bus.recv().await {
            Ok(routed) => router.handle(routed),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event bus lagged, events missed");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Periodically expires typing entries so stale indicators never linger
/// past one TTL beyond their deadline.
async fn sweep_loop(presence: Arc<PresenceTracker>, fan: Arc<EventFan>, ttl: Duration) {
    let mut ticker = tokio::time::interval(ttl);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        for (conversation_id, user_id) in presence.sweep() {
            fan.emit(CoreEvent::TypingChanged {
                conversation_id,
                user_id,
                typing: false,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber fan-out with duplicate absorption
// ---------------------------------------------------------------------------

/// Dedup key: event discriminant, message id, carried status, and a
/// payload detail so distinct reactions to one message stay distinct.
type DedupKey = (u8, String, Option<DeliveryStatus>, String);

/// Key for events that need duplicate absorption.
///
/// Typing and membership events are excluded: typing repeats are
/// semantic TTL refreshes, and membership flips are change-gated by the
/// presence tracker.
fn dedup_key(event: &WireEvent) -> Option<DedupKey> {
    match event {
        WireEvent::MessageReceived { message } => Some((
            0,
            message.id.to_string(),
            Some(message.status),
            String::new(),
        )),
        WireEvent::MessageDeleted { message_id, .. } => {
            Some((1, message_id.to_string(), None, String::new()))
        }
        WireEvent::MessageReaction {
            message_id,
            reaction,
            ..
        } => Some((
            2,
            message_id.to_string(),
            None,
            format!("{}:{}", reaction.user, reaction.emoji),
        )),
        WireEvent::StatusUpdated {
            message_id, status, ..
        } => Some((3, message_id.to_string(), Some(*status), String::new())),
        _ => None,
    }
}

/// Sliding-window duplicate absorber.
struct DedupWindow {
    window: Duration,
    max_entries: usize,
    seen: HashMap<DedupKey, Instant>,
}

impl DedupWindow {
    fn admit(&mut self, key: DedupKey) -> bool {
        let now = Instant::now();
        if let Some(&at) = self.seen.get(&key)
            && now.duration_since(at) < self.window
        {
            return false;
        }
        if self.seen.len() >= self.max_entries {
            // Simple eviction; a rare full re-admit beats unbounded growth.
            self.seen.clear();
        }
        self.seen.insert(key, now);
        true
    }
}

/// Fans [`CoreEvent`]s out to all subscribers.
struct EventFan {
    buffer: usize,
    subscribers: Mutex<Vec<mpsc::Sender<CoreEvent>>>,
    dedup: Mutex<DedupWindow>,
}

impl EventFan {
    fn new(buffer: usize, window: Duration, max_entries: usize) -> Self {
        Self {
            buffer,
            subscribers: Mutex::new(Vec::new()),
            dedup: Mutex::new(DedupWindow {
                window,
                max_entries,
                seen: HashMap::new(),
            }),
        }
    }

    fn subscribe(&self) -> mpsc::Receiver<CoreEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Whether an inbound wire event should be processed at all.
    fn admit(&self, event: &WireEvent) -> bool {
        dedup_key(event).is_none_or(|key| self.dedup.lock().admit(key))
    }

    fn emit(&self, event: CoreEvent) {
        self.subscribers.lock().retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("subscriber lagging, change event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}
