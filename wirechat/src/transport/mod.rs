//! Transport seam for the connection manager.
//!
//! Defines the [`EventTransport`] trait for a live, authenticated event
//! channel and the [`TransportDialer`] trait the connection manager uses
//! to (re)establish one. Concrete implementations:
//! - [`loopback`] — in-process hub-routed transport for tests
//! - [`ws`] — WebSocket client against the gateway

pub mod loopback;
pub mod ws;

use wirechat_proto::event::{ClientFrame, ServerFrame};

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No transport endpoint is configured; connecting is impossible
    /// until the session is reconfigured.
    #[error("no transport endpoint configured")]
    NotConfigured,

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// The auth handshake was rejected by the remote end.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live, authenticated bidirectional event channel.
///
/// Implementations carry already-encoded frames; event payload encoding
/// (the content codec) happens at the dispatcher layer.
pub trait EventTransport: Send + Sync + 'static {
    /// Sends a frame to the remote end.
    ///
    /// Returning `Ok(())` means the frame was handed to the underlying
    /// channel, not that any recipient observed it.
    fn send(&self, frame: &ClientFrame)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote end.
    ///
    /// Blocks asynchronously until a frame arrives or the connection is
    /// lost.
    fn recv(&self) -> impl Future<Output = Result<ServerFrame, TransportError>> + Send;

    /// Returns `true` while the underlying channel is usable.
    fn is_open(&self) -> bool;
}

/// Establishes [`EventTransport`] connections for a user.
///
/// The connection manager holds a dialer for the lifetime of a session so
/// it can redial during reconnect backoff. Dialing performs the full auth
/// handshake — a returned transport is ready to carry events.
pub trait TransportDialer: Send + Sync + 'static {
    /// The transport type this dialer produces.
    type Transport: EventTransport;

    /// Dials the endpoint and authenticates as `user_id`.
    fn dial(
        &self,
        user_id: &wirechat_proto::ids::UserId,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
