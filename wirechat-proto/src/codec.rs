//! Frame serialization for the gateway protocol.
//!
//! Postcard encode/decode for both frame directions. WebSocket framing
//! preserves message boundaries, so no length prefix is needed.

use crate::event::{ClientFrame, ServerFrame};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Serialization or deserialization failed.
    #[error("frame serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`ClientFrame`] into bytes.
///
/// # Errors
///
/// Returns [`FrameError::Serialization`] if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<Vec<u8>, FrameError> {
    postcard::to_allocvec(frame).map_err(|e| FrameError::Serialization(e.to_string()))
}

/// Decodes a [`ClientFrame`] from bytes.
///
/// # Errors
///
/// Returns [`FrameError::Serialization`] if the bytes are not a valid frame.
pub fn decode_client(bytes: &[u8]) -> Result<ClientFrame, FrameError> {
    postcard::from_bytes(bytes).map_err(|e| FrameError::Serialization(e.to_string()))
}

/// Encodes a [`ServerFrame`] into bytes.
///
/// # Errors
///
/// Returns [`FrameError::Serialization`] if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<Vec<u8>, FrameError> {
    postcard::to_allocvec(frame).map_err(|e| FrameError::Serialization(e.to_string()))
}

/// Decodes a [`ServerFrame`] from bytes.
///
/// # Errors
///
/// Returns [`FrameError::Serialization`] if the bytes are not a valid frame.
pub fn decode_server(bytes: &[u8]) -> Result<ServerFrame, FrameError> {
    postcard::from_bytes(bytes).map_err(|e| FrameError::Serialization(e.to_string()))
}
