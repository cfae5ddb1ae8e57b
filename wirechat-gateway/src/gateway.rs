//! Gateway core: session registry, auth handshake, and event routing.
//!
//! Each WebSocket connection must open with a [`ClientFrame::Auth`]
//! frame. Once authenticated, [`ClientFrame::Publish`] frames are fanned
//! out to the named recipients' live sessions. Recipients without a live
//! session are skipped — durable catch-up belongs to the persistence
//! API, not the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use wirechat_proto::codec as frames;
use wirechat_proto::event::{ClientFrame, RoutedEvent, ServerFrame};
use wirechat_proto::ids::UserId;

/// Shared gateway state: the live session registry and auth policy.
pub struct GatewayState {
    /// Maps user ids to the sender half of their session's write channel.
    sessions: RwLock<HashMap<UserId, mpsc::UnboundedSender<Message>>>,
    /// Token every `Auth` frame must match; `None` accepts any token.
    auth_token: Option<String>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    /// Creates a state that accepts any auth token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            auth_token: None,
        }
    }

    /// Creates a state that requires the given auth token.
    #[must_use]
    pub fn with_auth_token(token: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            auth_token: Some(token.into()),
        }
    }

    /// Registers a session, replacing (and thereby closing) any previous
    /// session of the same user.
    async fn register(
        &self,
        user_id: &UserId,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.sessions.write().await.insert(user_id.clone(), sender)
    }

    /// Removes a user's session from the registry.
    async fn unregister(&self, user_id: &UserId) {
        self.sessions.write().await.remove(user_id);
    }

    /// Returns the session sender for a user, if connected.
    async fn session(&self, user_id: &UserId) -> Option<mpsc::UnboundedSender<Message>> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sends a close frame to every live session.
    ///
    /// Used for graceful shutdown and disconnect tests.
    pub async fn close_all_sessions(&self) {
        let sessions = self.sessions.read().await;
        for (user_id, sender) in sessions.iter() {
            tracing::info!(user_id = %user_id, "sending close frame to session");
            let _ = sender.send(Message::Close(None));
        }
    }

    fn token_matches(&self, presented: &str) -> bool {
        self.auth_token
            .as_deref()
            .is_none_or(|expected| expected == presented)
    }
}

/// Handles one upgraded WebSocket connection.
///
/// Lifecycle: wait for `Auth` → validate → send `AuthOk` → register →
/// route `Publish` frames until the socket closes → unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user_id = match wait_for_auth(&mut ws_receiver, &state).await {
        AuthOutcome::Accepted(user_id) => user_id,
        AuthOutcome::Rejected(reason) => {
            tracing::warn!(reason = %reason, "authentication rejected");
            let rejected = ServerFrame::AuthRejected { reason };
            let _ = send_frame(&mut ws_sender, &rejected).await;
            return;
        }
        AuthOutcome::ConnectionLost => {
            tracing::debug!("connection closed before authentication");
            return;
        }
    };

    let ack = ServerFrame::AuthOk {
        user_id: user_id.clone(),
    };
    if let Err(e) = send_frame(&mut ws_sender, &ack).await {
        tracing::error!(user_id = %user_id, error = %e, "failed to send auth acknowledgment");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if state.register(&user_id, tx).await.is_some() {
        tracing::info!(user_id = %user_id, "replaced existing session (duplicate auth)");
    }
    tracing::info!(user_id = %user_id, "session authenticated");

    // Writer task: forwards routed messages onto this socket.
    let writer_user = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user_id = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader task: routes published events.
    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(&reader_user, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::debug!(user_id = %reader_user, "received close frame");
                    break;
                }
                _ => {
                    // Text, ping, and pong frames carry no events.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(&user_id).await;
    tracing::info!(user_id = %user_id, "session disconnected");
}

/// Outcome of the initial auth exchange.
enum AuthOutcome {
    Accepted(UserId),
    Rejected(String),
    ConnectionLost,
}

/// Waits for the first frame, which must be a valid `Auth`.
async fn wait_for_auth(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &GatewayState,
) -> AuthOutcome {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match frames::decode_client(&data) {
                    Ok(ClientFrame::Auth { user_id, token }) => {
                        if user_id.as_str().is_empty() {
                            AuthOutcome::Rejected("empty user id".to_string())
                        } else if state.token_matches(&token) {
                            AuthOutcome::Accepted(user_id)
                        } else {
                            AuthOutcome::Rejected("invalid token".to_string())
                        }
                    }
                    Ok(_) => AuthOutcome::Rejected("expected auth frame".to_string()),
                    Err(e) => AuthOutcome::Rejected(format!("malformed auth frame: {e}")),
                };
            }
            Message::Close(_) => return AuthOutcome::ConnectionLost,
            _ => {
                // Skip control frames before authentication.
            }
        }
    }
    AuthOutcome::ConnectionLost
}

/// Handles a binary frame from an authenticated session.
async fn handle_frame(user_id: &UserId, data: &[u8], state: &Arc<GatewayState>) {
    let frame = match frames::decode_client(data) {
        Ok(frame) => frame,
        Err(e) => {
            // A malformed frame never tears the session down.
            tracing::warn!(user_id = %user_id, error = %e, "malformed frame, skipping");
            return;
        }
    };

    match frame {
        ClientFrame::Publish { to, event } => {
            tracing::debug!(
                from = %user_id,
                recipients = to.len(),
                "routing event"
            );
            // The attested sender is the authenticated session user; a
            // client cannot publish on someone else's behalf.
            let server_frame = ServerFrame::Event(RoutedEvent {
                from: user_id.clone(),
                event,
            });
            let bytes = match frames::encode_server(&server_frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode event for routing");
                    return;
                }
            };
            for recipient in &to {
                if let Some(sender) = state.session(recipient).await {
                    if sender.send(Message::Binary(bytes.clone().into())).is_err() {
                        tracing::warn!(recipient = %recipient, "routing failed, dropping session");
                        state.unregister(recipient).await;
                    }
                } else {
                    tracing::debug!(recipient = %recipient, "recipient offline, event skipped");
                }
            }
        }
        ClientFrame::Auth { .. } => {
            tracing::warn!(user_id = %user_id, "duplicate auth frame from authenticated session");
            send_to_user(
                state,
                user_id,
                &ServerFrame::Error {
                    reason: "already authenticated".to_string(),
                },
            )
            .await;
        }
    }
}

/// Sends a server frame to a registered user via their session channel.
async fn send_to_user(state: &Arc<GatewayState>, user_id: &UserId, frame: &ServerFrame) {
    if let Some(sender) = state.session(user_id).await
        && let Ok(bytes) = frames::encode_server(frame)
    {
        let _ = sender.send(Message::Binary(bytes.into()));
    }
}

/// Encodes and sends a server frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = frames::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the gateway on the given address with default (token-less)
/// auth; returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(GatewayState::new())).await
}

/// Starts the gateway with a pre-configured [`GatewayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<GatewayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "gateway server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler upgrading HTTP requests to WebSocket sessions.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<GatewayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
