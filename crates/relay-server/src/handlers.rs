//! HTTP and WebSocket wiring for the Relay server.
//!
//! The WebSocket endpoint performs the handshake half of the session state
//! machine; the JSON API is the ingress for the sequencing, push, and pull
//! paths.

use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay_core::{
    NewMessage, PullService, PushService, Registry, Sequencer, StoreError, DEFAULT_MSG_TYPE,
};
use relay_protocol::{Command, Packet};
use relay_store::{Database, SqliteTimeline};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::session;

/// Shared server state.
pub struct AppState {
    /// Live-connection registry.
    pub registry: Arc<Registry>,
    /// Fan-out service.
    pub push: PushService,
    /// Timeline writer.
    pub sequencer: Sequencer,
    /// Catch-up service.
    pub pull: PullService,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over an open timeline store.
    #[must_use]
    pub fn new(config: Config, store: Arc<SqliteTimeline>) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            push: PushService::new(registry.clone()),
            sequencer: Sequencer::new(store.clone()),
            pull: PullService::new(store),
            registry,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    let db = Database::open(FsPath::new(&config.storage.path))?;
    let store = Arc::new(SqliteTimeline::new(db));
    let state = Arc::new(AppState::new(config.clone(), store));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/messages", post(send_message_handler))
        .route(
            "/api/conversations/:conversation_id/messages",
            get(pull_messages_handler),
        )
        .route("/api/conversations/:conversation_id/ack", post(ack_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online": state.registry.len()
    }))
}

/// WebSocket upgrade handler.
///
/// Requires a non-empty `user_id` query parameter; rejects the request
/// with a client error otherwise.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = match params.get("user_id").filter(|id| !id.is_empty()) {
        Some(id) => id.clone(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "user_id is required"})),
            )
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| session::handle_session(socket, user_id, state))
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    msg_id: String,
    conversation_id: String,
    sender_id: String,
    #[serde(default)]
    content: String,
    #[serde(default = "default_msg_type")]
    msg_type: i32,
    send_time: i64,
    /// Identities to notify over their live sessions. Offline recipients
    /// catch up via pull.
    #[serde(default)]
    deliver_to: Vec<String>,
}

fn default_msg_type() -> i32 {
    DEFAULT_MSG_TYPE
}

/// Sequence a message, then fan the delivery notification out.
async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let draft = NewMessage {
        msg_id: req.msg_id.clone(),
        conversation_id: req.conversation_id,
        sender_id: req.sender_id,
        content: req.content,
        msg_type: req.msg_type,
        send_time: req.send_time,
    };

    let (message, duplicate) = match state.sequencer.save_message(draft) {
        Ok(saved) => {
            metrics::record_sequenced();
            (saved, false)
        }
        // A duplicate is "already recorded": answer with the stored row.
        Err(StoreError::DuplicateMsgId(_)) => match state.sequencer.find_by_message_id(&req.msg_id)
        {
            Ok(existing) => (existing, true),
            Err(e) => return storage_error(e),
        },
        Err(e) => return storage_error(e),
    };

    if !duplicate && !req.deliver_to.is_empty() {
        let mut packet = Packet::new(Command::Chat)
            .with_msg_id(&message.msg_id)
            .with_seq(message.seq);
        if let Ok(payload) = serde_json::to_value(&message) {
            packet = packet.with_payload(payload);
        }

        // Partial delivery never fails the request; missed recipients
        // recover through the pull path.
        if let Err(err) = state.push.broadcast(&packet, &req.deliver_to).await {
            metrics::record_broadcast_failures(err.failures.len());
            warn!(
                msg_id = %message.msg_id,
                failed = ?err.failed_identities(),
                "partial delivery"
            );
        }
    }

    (
        StatusCode::OK,
        Json(json!({"code": 0, "duplicate": duplicate, "message": message})),
    )
        .into_response()
}

const MAX_PULL_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
struct PullParams {
    #[serde(default)]
    after_seq: u64,
    #[serde(default = "default_pull_limit")]
    limit: usize,
}

fn default_pull_limit() -> usize {
    50
}

/// Cursor-paginated catch-up over a conversation's timeline.
async fn pull_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(params): Query<PullParams>,
) -> Response {
    let limit = params.limit.clamp(1, MAX_PULL_LIMIT);
    match state
        .pull
        .pull_messages(&conversation_id, params.after_seq, limit)
    {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "code": 0,
                "messages": result.messages,
                "next_cursor_seq": result.next_cursor_seq,
                "has_more": result.has_more
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct AckRequest {
    user_id: String,
    ack_seq: i64,
}

/// Advance a user's read watermark for a conversation.
async fn ack_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(req): Json<AckRequest>,
) -> Response {
    match state
        .pull
        .ack_conversation(&req.user_id, &conversation_id, req.ack_seq)
    {
        Ok(()) => (StatusCode::OK, Json(json!({"code": 0}))).into_response(),
        Err(e) => storage_error(e),
    }
}

fn storage_error(err: StoreError) -> Response {
    error!(error = %err, "storage failure");
    metrics::record_error("storage");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"code": -1, "error": err.to_string()})),
    )
        .into_response()
}
