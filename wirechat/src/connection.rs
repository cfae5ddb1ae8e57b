//! Connection manager: one live transport session per authenticated user.
//!
//! [`ConnectionManager::connect`] dials the gateway through a
//! [`TransportDialer`], then hands the live transport to a supervisor task
//! that pumps inbound events onto a broadcast bus, drains outbound
//! publishes, and — when the transport drops — redials with exponential
//! backoff. Connection state transitions are observable through a watch
//! channel on the returned [`ConnectionHandle`].
//!
//! The bus is at-least-once: a reconnect can replay events the gateway
//! already delivered, so bus consumers (the dispatcher) must be
//! idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, watch};

use wirechat_proto::event::{ClientFrame, RoutedEvent, ServerFrame, WireEvent};
use wirechat_proto::ids::UserId;

use crate::config::CoreConfig;
use crate::transport::{EventTransport, TransportDialer, TransportError};

/// Observable lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing the endpoint for the first time.
    Connecting,
    /// Live and carrying events.
    Open,
    /// Transport lost; backoff/redial in progress.
    Reconnecting {
        /// Which attempt (1-based) is pending.
        attempt: u32,
    },
    /// Torn down by an explicit `disconnect`.
    Closed,
    /// Reconnect attempts exhausted; requires a caller-initiated
    /// `connect` to recover.
    Failed,
}

/// Errors surfaced by [`ConnectionManager::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No transport endpoint is configured. Fatal at startup; retrying
    /// without reconfiguration cannot succeed.
    #[error("no transport endpoint is configured")]
    Configuration,

    /// The auth handshake was rejected. Not retried automatically — the
    /// caller must re-authenticate first.
    #[error("authentication handshake rejected: {0}")]
    Auth(String),

    /// A transport-level failure.
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConfigured => Self::Configuration,
            TransportError::AuthRejected(reason) => Self::Auth(reason),
            other => Self::Transport(other),
        }
    }
}

/// Exponential backoff policy for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt; doubles each attempt after.
    pub base_delay: Duration,
    /// Upper bound on the per-attempt delay.
    pub max_delay: Duration,
    /// Attempt ceiling; afterwards the connection is `Failed`.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
    }
}

/// Outbound publish command routed through the supervisor task.
type Outbound = (Vec<UserId>, WireEvent);

/// Owns one live connection per user id.
///
/// Constructed once per authenticated session; dropping it (after
/// disconnecting) tears everything down — there is no global state.
pub struct ConnectionManager<D: TransportDialer> {
    dialer: Arc<D>,
    policy: ReconnectPolicy,
    bus_capacity: usize,
    sessions: Mutex<HashMap<UserId, ConnectionHandle>>,
}

impl<D: TransportDialer> ConnectionManager<D> {
    /// Creates a manager that dials through `dialer`.
    pub fn new(dialer: D, config: &CoreConfig) -> Self {
        Self {
            dialer: Arc::new(dialer),
            policy: config.reconnect.clone(),
            bus_capacity: config.bus_capacity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Connects as `user_id`, or returns the existing live handle.
    ///
    /// Idempotent per user id: while a session is live (including while
    /// it is reconnecting), repeat calls return the same handle. After
    /// `Closed` or `Failed`, a call dials fresh.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Configuration`] if no endpoint is configured,
    /// [`ConnectError::Auth`] if the handshake is rejected, and
    /// [`ConnectError::Transport`] for everything else.
    pub async fn connect(&self, user_id: &UserId) -> Result<ConnectionHandle, ConnectError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(user_id)
            && handle.is_live()
        {
            tracing::debug!(user_id = %user_id, "reusing existing live connection");
            return Ok(handle.clone());
        }

        let transport = self.dialer.dial(user_id).await.map_err(ConnectError::from)?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(self.bus_capacity);
        let (bus_tx, _) = broadcast::channel(self.bus_capacity);

        let _ = state_tx.send(ConnectionState::Open);
        tracing::info!(user_id = %user_id, "connection open");

        tokio::spawn(run_session::<D>(
            transport,
            Arc::clone(&self.dialer),
            user_id.clone(),
            state_tx,
            bus_tx.clone(),
            outbound_rx,
            shutdown_rx,
            self.policy.clone(),
        ));

        let handle = ConnectionHandle {
            inner: Arc::new(HandleInner {
                user_id: user_id.clone(),
                state_rx,
                bus: bus_tx,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            }),
        };
        sessions.insert(user_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Disconnects the session of `user_id`, if one exists.
    ///
    /// Safe to call repeatedly and for unknown users.
    pub async fn disconnect(&self, user_id: &UserId) {
        if let Some(handle) = self.sessions.lock().await.get(user_id) {
            handle.disconnect();
        }
    }
}

struct HandleInner {
    user_id: UserId,
    state_rx: watch::Receiver<ConnectionState>,
    bus: broadcast::Sender<RoutedEvent>,
    outbound: mpsc::Sender<Outbound>,
    shutdown: watch::Sender<bool>,
}

/// Cheap, clonable handle to a live connection session.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// The user this session is authenticated as.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state_rx.borrow().clone()
    }

    /// Observable stream of state transitions.
    #[must_use]
    pub fn state_stream(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Subscribes to the inbound event bus (at-least-once delivery).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoutedEvent> {
        self.inner.bus.subscribe()
    }

    /// Publishes an event to the given recipients.
    ///
    /// Routed through the supervisor task that owns the live transport.
    /// Best-effort: if the transport drops before the frame is written,
    /// the event is lost and the session reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the session has
    /// shut down.
    pub async fn publish(&self, to: Vec<UserId>, event: WireEvent) -> Result<(), TransportError> {
        self.inner
            .outbound
            .send((to, event))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Tears the session down deterministically.
    ///
    /// Idempotent — repeat calls are no-ops — and cancels an in-progress
    /// reconnect backoff sleep.
    pub fn disconnect(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Returns `true` while the session is live (open or reconnecting).
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(
            self.state(),
            ConnectionState::Closed | ConnectionState::Failed
        )
    }
}

/// Outcome of driving one transport epoch.
enum Drive {
    /// Explicit disconnect requested.
    Shutdown,
    /// Every handle was dropped; nothing left to serve.
    HandlesGone,
    /// The transport dropped; a reconnect is warranted.
    Lost,
}

/// Outcome of a backoff/redial cycle.
enum Reconnect<T> {
    Restored(T),
    GaveUp,
    Cancelled,
}

/// Supervisor: drives the transport, reconnecting across epochs.
#[allow(clippy::too_many_arguments)]
async fn run_session<D: TransportDialer>(
    mut transport: D::Transport,
    dialer: Arc<D>,
    user_id: UserId,
    state_tx: watch::Sender<ConnectionState>,
    bus: broadcast::Sender<RoutedEvent>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut shutdown_rx: watch::Receiver<bool>,
    policy: ReconnectPolicy,
) {
    loop {
        match drive(&transport, &bus, &mut outbound_rx, &mut shutdown_rx).await {
            Drive::Shutdown => {
                let _ = state_tx.send(ConnectionState::Closed);
                tracing::info!(user_id = %user_id, "connection closed");
                return;
            }
            Drive::HandlesGone => {
                let _ = state_tx.send(ConnectionState::Closed);
                tracing::debug!(user_id = %user_id, "all handles dropped, closing connection");
                return;
            }
            Drive::Lost => {
                match reconnect(&*dialer, &user_id, &state_tx, &mut shutdown_rx, &policy).await {
                    Reconnect::Restored(restored) => {
                        transport = restored;
                        let _ = state_tx.send(ConnectionState::Open);
                        tracing::info!(user_id = %user_id, "connection restored");
                    }
                    Reconnect::GaveUp => {
                        let _ = state_tx.send(ConnectionState::Failed);
                        tracing::warn!(
                            user_id = %user_id,
                            attempts = policy.max_attempts,
                            "reconnect attempts exhausted, connection failed"
                        );
                        return;
                    }
                    Reconnect::Cancelled => {
                        let _ = state_tx.send(ConnectionState::Closed);
                        tracing::info!(user_id = %user_id, "reconnect cancelled by disconnect");
                        return;
                    }
                }
            }
        }
    }
}

/// Pumps one transport until it drops, shutdown is requested, or all
/// handles are gone.
async fn drive<T: EventTransport>(
    transport: &T,
    bus: &broadcast::Sender<RoutedEvent>,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Drive {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Drive::Shutdown;
                }
            }
            frame = transport.recv() => match frame {
                Ok(ServerFrame::Event(event)) => {
                    // No subscribers is fine; send only fails then.
                    let _ = bus.send(event);
                }
                Ok(ServerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "gateway reported an error");
                }
                Ok(_) => {
                    // Auth frames after the handshake carry no information.
                }
                Err(err) => {
                    tracing::warn!(err = %err, "transport lost");
                    return Drive::Lost;
                }
            },
            cmd = outbound_rx.recv() => match cmd {
                Some((to, event)) => {
                    if let Err(err) = transport.send(&ClientFrame::Publish { to, event }).await {
                        tracing::warn!(err = %err, "publish failed, reconnecting");
                        return Drive::Lost;
                    }
                }
                None => return Drive::HandlesGone,
            },
        }
    }
}

/// Backoff/redial cycle: `base * 2^(n-1)` delays up to the attempt
/// ceiling, cancellable by `disconnect` at any point in a sleep.
async fn reconnect<D: TransportDialer>(
    dialer: &D,
    user_id: &UserId,
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &mut watch::Receiver<bool>,
    policy: &ReconnectPolicy,
) -> Reconnect<D::Transport> {
    for attempt in 1..=policy.max_attempts {
        let _ = state_tx.send(ConnectionState::Reconnecting { attempt });
        let delay = policy.delay_for(attempt);
        tracing::info!(
            user_id = %user_id,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "waiting before reconnect attempt"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return Reconnect::Cancelled;
                    }
                }
            }
        }

        match dialer.dial(user_id).await {
            Ok(transport) => return Reconnect::Restored(transport),
            Err(TransportError::AuthRejected(reason)) => {
                // Credentials went bad mid-session; retrying cannot help.
                tracing::warn!(user_id = %user_id, reason = %reason, "auth rejected during reconnect");
                return Reconnect::GaveUp;
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, attempt, err = %err, "reconnect attempt failed");
            }
        }
    }
    Reconnect::GaveUp
}
