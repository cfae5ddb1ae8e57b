//! WebSocket transport against the event gateway.
//!
//! Implements [`EventTransport`] over a tokio-tungstenite connection.
//! Dialing performs the auth handshake (send `Auth`, wait for `AuthOk`)
//! before spawning a background reader task, so a returned transport is
//! ready to carry events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use wirechat_proto::codec as frames;
use wirechat_proto::event::{ClientFrame, ServerFrame};
use wirechat_proto::ids::UserId;

use super::{EventTransport, TransportDialer, TransportError};

/// Write half of the WebSocket connection.
type WsSink =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Read half of the WebSocket connection.
type WsSource =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Channel capacity between the reader task and `recv` callers.
const INCOMING_CAPACITY: usize = 256;

/// Dialer for [`WsTransport`] connections.
///
/// Holds the endpoint and session token from the core config. An absent
/// endpoint makes every dial fail with [`TransportError::NotConfigured`]
/// — surfaced by the connection manager as a configuration error.
#[derive(Debug, Clone)]
pub struct WsDialer {
    endpoint: Option<String>,
    token: String,
    connect_timeout: Duration,
    auth_timeout: Duration,
}

impl WsDialer {
    /// Creates a dialer for the given endpoint.
    pub fn new(endpoint: Option<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint,
            token: token.into(),
            connect_timeout: crate::config::DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: crate::config::DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Creates a dialer from a core config.
    #[must_use]
    pub fn from_config(config: &crate::config::CoreConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            token: config.auth_token.clone(),
            connect_timeout: config.connect_timeout,
            auth_timeout: config.auth_timeout,
        }
    }
}

impl TransportDialer for WsDialer {
    type Transport = WsTransport;

    async fn dial(&self, user_id: &UserId) -> Result<Self::Transport, TransportError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(TransportError::NotConfigured);
        };

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
                .await
                .map_err(|_| {
                    tracing::warn!(endpoint, "gateway connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(endpoint, err = %e, "gateway connect failed");
                    map_connect_error(endpoint, e)
                })?;

        let (mut sink, mut source) = ws_stream.split();

        // Auth handshake: send Auth, wait for AuthOk.
        let auth = ClientFrame::Auth {
            user_id: user_id.clone(),
            token: self.token.clone(),
        };
        let bytes = frames::encode_client(&auth)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        sink.send(Message::Binary(bytes.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "failed to send auth frame");
            TransportError::Io(std::io::Error::other(format!("auth send failed: {e}")))
        })?;

        wait_for_auth_ack(&mut source, self.auth_timeout, endpoint).await?;

        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));
        let reader_open = Arc::clone(&open);
        let reader_handle = tokio::spawn(reader_loop(source, tx, reader_open));

        tracing::info!(user_id = %user_id, endpoint, "gateway session established");

        Ok(WsTransport {
            sink: Mutex::new(sink),
            incoming: Mutex::new(rx),
            open,
            _reader_handle: reader_handle,
        })
    }
}

/// Waits for the gateway's response to the auth frame.
async fn wait_for_auth_ack(
    source: &mut WsSource,
    timeout: Duration,
    endpoint: &str,
) -> Result<(), TransportError> {
    let ack = tokio::time::timeout(timeout, source.next())
        .await
        .map_err(|_| {
            tracing::warn!(endpoint, "auth acknowledgment timed out");
            TransportError::Timeout
        })?;

    match ack {
        Some(Ok(Message::Binary(data))) => match frames::decode_server(&data) {
            Ok(ServerFrame::AuthOk { user_id }) => {
                tracing::debug!(user_id = %user_id, "authenticated with gateway");
                Ok(())
            }
            Ok(ServerFrame::AuthRejected { reason }) => {
                tracing::warn!(reason = %reason, "gateway rejected authentication");
                Err(TransportError::AuthRejected(reason))
            }
            Ok(other) => {
                tracing::warn!(?other, "unexpected frame during auth handshake");
                Err(TransportError::Io(std::io::Error::other(
                    "unexpected frame during auth handshake",
                )))
            }
            Err(e) => {
                tracing::warn!(err = %e, "malformed auth response");
                Err(TransportError::Io(std::io::Error::other(format!(
                    "malformed auth response: {e}"
                ))))
            }
        },
        Some(Ok(Message::Close(_))) | None => Err(TransportError::ConnectionClosed),
        Some(Ok(_)) => Err(TransportError::Io(std::io::Error::other(
            "unexpected non-binary frame during auth handshake",
        ))),
        Some(Err(e)) => Err(TransportError::Io(std::io::Error::other(format!(
            "WebSocket error during auth handshake: {e}"
        )))),
    }
}

/// WebSocket [`EventTransport`] implementation.
pub struct WsTransport {
    sink: Mutex<WsSink>,
    incoming: Mutex<mpsc::Receiver<ServerFrame>>,
    open: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl EventTransport for WsTransport {
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let bytes = frames::encode_client(frame)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;

        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(bytes.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "gateway send failed");
            self.open.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
    }

    async fn recv(&self) -> Result<ServerFrame, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

/// Background task reading WebSocket frames into the incoming channel.
///
/// Malformed frames are logged and skipped — a bad frame never tears the
/// connection down. Sets `open` to `false` when the socket closes.
async fn reader_loop(
    mut source: WsSource,
    tx: mpsc::Sender<ServerFrame>,
    open: Arc<AtomicBool>,
) {
    while let Some(result) = source.next().await {
        match result {
            Ok(Message::Binary(data)) => match frames::decode_server(&data) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        // Transport dropped; stop reading.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed gateway frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("gateway closed the connection");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {
                // Control and text frames carry no events.
            }
            Err(e) => {
                tracing::warn!(err = %e, "gateway read error");
                break;
            }
        }
    }
    open.store(false, Ordering::Relaxed);
    tracing::debug!("gateway reader task exiting");
}

/// Maps a tungstenite connection error to a [`TransportError`].
fn map_connect_error(endpoint: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(endpoint.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "gateway HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "gateway connection error: {other}"
        ))),
    }
}
