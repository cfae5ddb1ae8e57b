//! `WireChat` — transport-agnostic realtime messaging core.
//!
//! Owns the socket session lifecycle, the optimistic per-conversation
//! message cache with server-id reconciliation, delivery-status tracking,
//! presence/typing state, and fan-out of change events to subscribers.
//! Persistence, key management, and rendering are external collaborators
//! behind the [`persistence::Persistence`] and [`codec::ContentCodec`]
//! seams.

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod persistence;
pub mod presence;
pub mod store;
pub mod transport;
