//! Per-connection protocol handling.
//!
//! Each accepted WebSocket runs one read loop: Handshaking (the HTTP
//! upgrade in `handlers::ws_handler`) → Active (registered, reading) →
//! Closed. Every failure path funnels to a single cleanup point that
//! deregisters the identity exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_core::{Session, SessionError, SharedSession};
use relay_protocol::{codec, Command, Packet};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};

/// The outbound half of a WebSocket, registered in the registry.
///
/// Writes take the sink mutex and are bounded by the configured write
/// timeout; any failed or timed-out write marks the session closed.
pub struct WsSession {
    identity: String,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    write_timeout: Duration,
    open: AtomicBool,
}

impl WsSession {
    fn new(identity: &str, sink: SplitSink<WebSocket, Message>, write_timeout: Duration) -> Self {
        Self {
            identity: identity.to_string(),
            sink: Mutex::new(sink),
            write_timeout,
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Session for WsSession {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn send(&self, packet: &Packet) -> Result<(), SessionError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let text = codec::encode(packet)?;
        metrics::record_frame(text.len(), "outbound");

        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.open.store(false, Ordering::SeqCst);
                Err(SessionError::Send(e.to_string()))
            }
            Err(_) => {
                self.open.store(false, Ordering::SeqCst);
                Err(SessionError::Timeout)
            }
        }
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return; // Already closed
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}

/// Run one connection's read loop until it closes.
pub async fn handle_session(socket: WebSocket, identity: String, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sink, mut stream) = socket.split();
    let session: SharedSession = Arc::new(WsSession::new(
        &identity,
        sink,
        state.config.session.write_timeout(),
    ));
    state.registry.add(identity.clone(), session.clone()).await;
    debug!(user = %identity, online = ?state.registry.identities(), "session active");

    let read_deadline = state.config.session.read_deadline();
    loop {
        // The deadline re-arms on every inbound message, including pongs.
        let received = match tokio::time::timeout(read_deadline, stream.next()).await {
            Err(_) => {
                debug!(user = %identity, "idle deadline elapsed");
                break;
            }
            Ok(None) => {
                debug!(user = %identity, "stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(user = %identity, error = %e, "read failed");
                metrics::record_error("transport");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match received {
            Message::Text(text) => {
                if let Err(e) = handle_frame(text.as_bytes(), &identity, &session, &state).await {
                    warn!(user = %identity, error = %e, "terminating session");
                    break;
                }
            }
            Message::Binary(data) => {
                if let Err(e) = handle_frame(&data, &identity, &session, &state).await {
                    warn!(user = %identity, error = %e, "terminating session");
                    break;
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Keepalive traffic; reaching here already re-armed the
                // deadline.
            }
            Message::Close(_) => {
                debug!(user = %identity, "received close frame");
                break;
            }
        }
    }

    // Single cleanup point: deregister exactly once, unless a reconnect
    // already replaced this session with a newer one.
    state.registry.remove_if_current(&identity, &session).await;
    debug!(user = %identity, "session closed");
}

/// Handle one inbound frame. An error is terminal for the session.
async fn handle_frame(
    data: &[u8],
    identity: &str,
    session: &SharedSession,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    metrics::record_frame(data.len(), "inbound");

    if data.len() > state.config.session.max_frame_bytes {
        metrics::record_error("frame_too_large");
        anyhow::bail!(
            "frame of {} bytes exceeds limit of {}",
            data.len(),
            state.config.session.max_frame_bytes
        );
    }

    let envelope = codec::decode(data).map_err(|e| {
        metrics::record_error("decode");
        e
    })?;

    match envelope.command() {
        Some(Command::Heartbeat) => {
            session.send(&Packet::heartbeat_ack()).await.map_err(|e| {
                metrics::record_error("heartbeat_write");
                e
            })?;
        }
        Some(command) => {
            // Extension point for login, chat-send, pull, and ack routing.
            debug!(
                user = %identity,
                command = ?command,
                msg_id = ?envelope.msg_id,
                "command routing not yet wired"
            );
        }
        None => {
            debug!(user = %identity, cmd = envelope.cmd, "unknown command code");
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(())
}
