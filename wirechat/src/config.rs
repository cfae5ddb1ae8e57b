//! Core configuration.
//!
//! One [`CoreConfig`] is built per authenticated session and handed to
//! the connection manager and dispatcher. All fields have documented
//! defaults; embedders override what they need.

use std::time::Duration;

use crate::connection::ReconnectPolicy;

/// Default typing-indicator time-to-live.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(2);

/// Default window within which duplicate inbound events are absorbed.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Default maximum number of entries tracked by the dedup window.
pub const DEFAULT_DEDUP_MAX_ENTRIES: usize = 10_000;

/// Default per-subscriber event channel capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Default capacity of the connection manager's event bus.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Default timeout for establishing the transport connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the auth handshake acknowledgment.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Session-scoped configuration for the messaging core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Gateway WebSocket endpoint (e.g. `ws://host:9100/ws`). `None`
    /// means no transport endpoint is configured — `connect` fails with
    /// a configuration error.
    pub endpoint: Option<String>,
    /// Session token presented during the auth handshake.
    pub auth_token: String,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectPolicy,
    /// Typing-indicator TTL; entries not refreshed within this window
    /// expire back to idle.
    pub typing_ttl: Duration,
    /// Sliding window for absorbing duplicate inbound events.
    pub dedup_window: Duration,
    /// Bound on dedup bookkeeping before eviction.
    pub dedup_max_entries: usize,
    /// Capacity of each subscriber's event channel.
    pub event_buffer: usize,
    /// Capacity of the connection manager's broadcast bus.
    pub bus_capacity: usize,
    /// Timeout for establishing the transport connection.
    pub connect_timeout: Duration,
    /// Timeout for the auth handshake acknowledgment.
    pub auth_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth_token: String::new(),
            reconnect: ReconnectPolicy::default(),
            typing_ttl: DEFAULT_TYPING_TTL,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            dedup_max_entries: DEFAULT_DEDUP_MAX_ENTRIES,
            event_buffer: DEFAULT_EVENT_BUFFER,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

impl CoreConfig {
    /// Creates a config pointing at the given gateway endpoint, all other
    /// fields at their defaults.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }
}
