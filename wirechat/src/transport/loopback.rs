//! In-process loopback transport for tests.
//!
//! A [`LoopbackHub`] plays the gateway's routing role entirely in memory:
//! dialing registers the user's inbox with the hub, and published events
//! are delivered straight into the recipients' inboxes. The hub can be
//! scripted to reject users (auth failures) and to sever live connections
//! (reconnect tests).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use wirechat_proto::event::{ClientFrame, RoutedEvent, ServerFrame};
use wirechat_proto::ids::UserId;

use super::{EventTransport, TransportDialer, TransportError};

/// Channel capacity of each user inbox.
const INBOX_CAPACITY: usize = 256;

/// In-memory stand-in for the gateway.
///
/// Clones share the same routing state.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    inboxes: HashMap<UserId, mpsc::Sender<ServerFrame>>,
    denied: HashSet<UserId>,
    offline: bool,
}

impl LoopbackHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a dialer that connects through this hub.
    #[must_use]
    pub fn dialer(&self) -> LoopbackDialer {
        LoopbackDialer { hub: self.clone() }
    }

    /// Makes future dials by `user_id` fail the auth handshake.
    pub fn deny(&self, user_id: &UserId) {
        self.inner.lock().denied.insert(user_id.clone());
    }

    /// Undoes a previous [`deny`](Self::deny).
    pub fn allow(&self, user_id: &UserId) {
        self.inner.lock().denied.remove(user_id);
    }

    /// Simulates a hub outage: while offline, every dial fails as
    /// unreachable. Live connections are unaffected until severed.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Severs the live connection of `user_id`, if any.
    ///
    /// The user's transport observes a closed channel on its next
    /// `recv`, exactly as if the gateway dropped the socket. A later
    /// dial re-registers the user.
    pub fn sever(&self, user_id: &UserId) {
        self.inner.lock().inboxes.remove(user_id);
    }

    /// Returns `true` while `user_id` has a registered inbox.
    #[must_use]
    pub fn is_registered(&self, user_id: &UserId) -> bool {
        self.inner.lock().inboxes.contains_key(user_id)
    }

    fn register(&self, user_id: &UserId) -> Result<mpsc::Receiver<ServerFrame>, TransportError> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(TransportError::Unreachable("loopback hub".to_string()));
        }
        if state.denied.contains(user_id) {
            return Err(TransportError::AuthRejected(format!(
                "user {user_id} is not allowed"
            )));
        }
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        // A re-dial replaces any previous registration, closing the old
        // transport's inbox.
        state.inboxes.insert(user_id.clone(), tx);
        Ok(rx)
    }

    fn route(&self, to: &[UserId], frame: ServerFrame) {
        let senders: Vec<_> = {
            let state = self.inner.lock();
            to.iter()
                .filter_map(|user| state.inboxes.get(user).cloned())
                .collect()
        };
        for sender in senders {
            // Disconnected recipients are dropped, matching the gateway's
            // realtime-only routing.
            let _ = sender.try_send(frame.clone());
        }
    }
}

/// Dialer producing [`LoopbackTransport`] connections through a hub.
#[derive(Clone)]
pub struct LoopbackDialer {
    hub: LoopbackHub,
}

impl TransportDialer for LoopbackDialer {
    type Transport = LoopbackTransport;

    async fn dial(&self, user_id: &UserId) -> Result<Self::Transport, TransportError> {
        let rx = self.hub.register(user_id)?;
        Ok(LoopbackTransport {
            local_id: user_id.clone(),
            hub: self.hub.clone(),
            incoming: tokio::sync::Mutex::new(rx),
        })
    }
}

/// Hub-routed in-process transport.
pub struct LoopbackTransport {
    local_id: UserId,
    hub: LoopbackHub,
    incoming: tokio::sync::Mutex<mpsc::Receiver<ServerFrame>>,
}

impl EventTransport for LoopbackTransport {
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        if !self.hub.is_registered(&self.local_id) {
            return Err(TransportError::ConnectionClosed);
        }
        match frame {
            ClientFrame::Publish { to, event } => {
                // The hub attests the sender, like the real gateway.
                let routed = RoutedEvent {
                    from: self.local_id.clone(),
                    event: event.clone(),
                };
                self.hub.route(to, ServerFrame::Event(routed));
                Ok(())
            }
            // Auth is handled at dial time for loopback connections.
            ClientFrame::Auth { .. } => Ok(()),
        }
    }

    async fn recv(&self) -> Result<ServerFrame, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        self.hub.is_registered(&self.local_id)
    }
}
