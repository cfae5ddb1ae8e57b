//! Message records and drafts.
//!
//! A [`Message`] is immutable once confirmed, except for its delivery
//! status and reaction list. `content` is opaque to this crate — it may be
//! ciphertext or plaintext depending on the content codec the core is
//! configured with.

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryStatus;
use crate::ids::{ConversationId, MessageId, Timestamp, UserId};

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// What kind of payload a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Source code snippet (see `code_language` / `code_filename`).
    Code,
    /// Image attachment reference.
    Image,
    /// File attachment reference.
    File,
    /// Hyperlink.
    Link,
    /// Markdown-formatted text.
    Markdown,
    /// System-generated notice (joins, renames, ...).
    System,
}

/// A single emoji reaction attached to a message.
///
/// Repeated reactions by the same user with the same emoji are recorded
/// as sent; collapsing them is left to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reaction {
    /// The reaction emoji.
    pub emoji: String,
    /// The user who reacted.
    pub user: UserId,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Live identifier — local placeholder until reconciled to the
    /// server-assigned id.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent it.
    pub sender_id: UserId,
    /// Opaque content (ciphertext or plaintext, per codec).
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Client-observed creation time. Never rewritten — reconciliation
    /// and status changes leave it untouched.
    pub sent_at: Timestamp,
    /// Current delivery status.
    pub status: DeliveryStatus,
    /// Weak reference to the message being replied to. A dangling
    /// reference is valid; consumers render a placeholder for it.
    pub reply_to: Option<MessageId>,
    /// Reactions attached so far.
    pub reactions: Vec<Reaction>,
    /// When set, the message is removed client-side at this instant.
    pub self_destruct_at: Option<Timestamp>,
    /// Language annotation for `Code` messages.
    pub code_language: Option<String>,
    /// Filename annotation for `Code` messages.
    pub code_filename: Option<String>,
}

/// Error returned when a message or draft fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl Message {
    /// Validates this message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] for empty content, or
    /// [`ValidationError::TooLarge`] when it exceeds [`MAX_CONTENT_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_content(&self.content)
    }
}

/// Validates raw content against the emptiness and size rules.
///
/// # Errors
///
/// Same contract as [`Message::validate`].
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = content.len();
    if size > MAX_CONTENT_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_CONTENT_SIZE,
        });
    }
    Ok(())
}

/// Caller-supplied portion of an outgoing message.
///
/// The dispatcher fills in the id, sender, timestamp, and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Plaintext content to send.
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Message being replied to, if any.
    pub reply_to: Option<MessageId>,
    /// Self-destruct delay in seconds, if any.
    pub self_destruct_secs: Option<u64>,
    /// Language annotation for `Code` drafts.
    pub code_language: Option<String>,
    /// Filename annotation for `Code` drafts.
    pub code_filename: Option<String>,
}

impl MessageDraft {
    /// Creates a plain-text draft with no extras.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            reply_to: None,
            self_destruct_secs: None,
            code_language: None,
            code_filename: None,
        }
    }
}
