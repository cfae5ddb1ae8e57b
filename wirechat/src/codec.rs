//! Content codec seam.
//!
//! Message content is opaque to the core: an encrypting deployment plugs
//! in a codec backed by its key management, a plaintext deployment uses
//! [`PlainCodec`]. Decode failure is always localized to the one message —
//! the dispatcher substitutes [`UNAVAILABLE_CONTENT`] and carries on.

/// Placeholder substituted for content that could not be decoded, and
/// rendered for dangling reply references.
pub const UNAVAILABLE_CONTENT: &str = "message unavailable";

/// Error returned when content cannot be decoded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("content decode failed: {reason}")]
pub struct DecodeError {
    /// Why decoding failed (corrupt content, wrong key, ...).
    pub reason: String,
}

impl DecodeError {
    /// Creates a decode error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Encodes outgoing plaintext into wire content and decodes inbound wire
/// content back into plaintext.
///
/// Implementations must be cheap to call per message; the dispatcher
/// invokes `decode` on every inbound message event.
pub trait ContentCodec: Send + Sync + 'static {
    /// Encodes plaintext into the wire/persistence content form.
    fn encode(&self, plaintext: &str) -> String;

    /// Decodes wire/persistence content back into plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the content is corrupt or was produced
    /// with an incompatible codec. The caller must degrade gracefully —
    /// never drop the message or crash.
    fn decode(&self, content: &str) -> Result<String, DecodeError>;
}

/// Identity codec: content travels as plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl ContentCodec for PlainCodec {
    fn encode(&self, plaintext: &str) -> String {
        plaintext.to_string()
    }

    fn decode(&self, content: &str) -> Result<String, DecodeError> {
        Ok(content.to_string())
    }
}
