//! Handoff HTTP + WebSocket API
//!
//! Axum server exposing the session lifecycle to widgets and agent consoles.
//! Each endpoint is a thin axum handler over an inner function that returns
//! `(StatusCode, serde_json::Value)`, so the inner functions can be tested
//! without the dispatch machinery.
//!
//! Endpoints:
//! - GET  /health:                    store ping
//! - GET  /version:                   server version info
//! - POST /sessions:                  request a live agent
//! - GET  /sessions:                  list sessions (agent dashboard)
//! - GET  /sessions/:id:              session detail
//! - POST /sessions/:id/claim:        agent claims a waiting session
//! - POST /sessions/:id/messages:     send a message
//! - GET  /sessions/:id/messages:     pull messages since a cursor
//! - POST /sessions/:id/end:          end the chat (idempotent)
//! - GET  /ws:                        push channel

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use handoff_core::wire::{
    ClaimRequest, ClientFrame, ControlFrame, EndRequest, ErrorBody, ListSessionsQuery,
    ListSessionsResponse, PullQuery, RequestAgentRequest, SendMessageRequest, ServerFrame,
    SessionResponse, PROTOCOL,
};
use handoff_core::{EndedBy, HandoffConfig, HandoffError};

use crate::subsystems::lifecycle::SessionManager;
use crate::subsystems::push::{PushChannel, Topic};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub manager: Arc<SessionManager>,
    pub config: HandoffConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/sessions", post(request_agent_handler).get(list_sessions_handler))
        .route("/sessions/:id", get(get_session_handler))
        .route("/sessions/:id/claim", post(claim_handler))
        .route("/sessions/:id/messages", post(send_handler).get(pull_handler))
        .route("/sessions/:id/end", post(end_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    manager: Arc<SessionManager>,
    config: HandoffConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { manager, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Handoff HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Error mapping
// ============================================================================

pub fn status_for(error: &HandoffError) -> StatusCode {
    match error {
        HandoffError::Validation(_) => StatusCode::BAD_REQUEST,
        HandoffError::NotFound(_) => StatusCode::NOT_FOUND,
        HandoffError::InvalidTransition { .. } => StatusCode::CONFLICT,
        HandoffError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: &HandoffError) -> (StatusCode, serde_json::Value) {
    let status = status_for(error);
    if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
    } else {
        tracing::debug!(error = %error, code = error.kind(), "Request rejected");
    }
    let body = ErrorBody::new(error.kind(), error.to_string());
    (status, serde_json::to_value(body).unwrap_or_default())
}

fn respond<T: Serialize>(result: handoff_core::Result<T>) -> (StatusCode, serde_json::Value) {
    match result.and_then(|v| serde_json::to_value(v).map_err(|e| HandoffError::Other(e.to_string()))) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => error_response(&e),
    }
}

fn parse_session_id(raw: &str) -> handoff_core::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| HandoffError::validation(format!("invalid session id '{}'", raw)))
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(manager: &SessionManager) -> (StatusCode, serde_json::Value) {
    match manager.ping().await {
        Ok(store) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL,
    })
}

pub async fn request_agent_inner(
    manager: &SessionManager,
    req: RequestAgentRequest,
) -> (StatusCode, serde_json::Value) {
    respond(manager.request_live_agent(req).await)
}

pub async fn list_sessions_inner(
    manager: &SessionManager,
    query: ListSessionsQuery,
) -> (StatusCode, serde_json::Value) {
    respond(
        manager
            .list_sessions(query.status.as_deref(), query.limit)
            .await
            .map(|sessions| ListSessionsResponse {
                success: true,
                sessions,
            }),
    )
}

pub async fn get_session_inner(manager: &SessionManager, id: &str) -> (StatusCode, serde_json::Value) {
    let result = async {
        let session = manager.get_session(parse_session_id(id)?).await?;
        Ok::<_, HandoffError>(SessionResponse {
            success: true,
            session,
        })
    }
    .await;
    respond(result)
}

pub async fn claim_inner(
    manager: &SessionManager,
    id: &str,
    req: ClaimRequest,
) -> (StatusCode, serde_json::Value) {
    let result = async {
        let session_id = parse_session_id(id)?;
        let agent_id = req.agent_id.as_deref().unwrap_or_default();
        let session = manager
            .claim_session(session_id, agent_id, req.agent_name.as_deref())
            .await?;
        Ok::<_, HandoffError>(SessionResponse {
            success: true,
            session,
        })
    }
    .await;
    respond(result)
}

pub async fn send_inner(
    manager: &SessionManager,
    id: &str,
    req: SendMessageRequest,
) -> (StatusCode, serde_json::Value) {
    let result = async { manager.send_message(parse_session_id(id)?, req).await }.await;
    respond(result)
}

pub async fn pull_inner(
    manager: &SessionManager,
    id: &str,
    query: PullQuery,
) -> (StatusCode, serde_json::Value) {
    let result = async {
        manager
            .pull_messages(parse_session_id(id)?, query.last_message_timestamp)
            .await
    }
    .await;
    respond(result)
}

pub async fn end_inner(
    manager: &SessionManager,
    id: &str,
    req: EndRequest,
) -> (StatusCode, serde_json::Value) {
    let result = async {
        let session_id = parse_session_id(id)?;
        let ended_by: EndedBy = req.ended_by.as_deref().unwrap_or("customer").parse()?;
        manager.end_session(session_id, ended_by).await
    }
    .await;
    respond(result)
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.manager).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn request_agent_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RequestAgentRequest>,
) -> impl IntoResponse {
    let (status, body) = request_agent_inner(&state.manager, req).await;
    (status, Json(body))
}

pub async fn list_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let (status, body) = list_sessions_inner(&state.manager, query).await;
    (status, Json(body))
}

pub async fn get_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = get_session_inner(&state.manager, &id).await;
    (status, Json(body))
}

pub async fn claim_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> impl IntoResponse {
    let (status, body) = claim_inner(&state.manager, &id, req).await;
    (status, Json(body))
}

pub async fn send_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    let (status, body) = send_inner(&state.manager, &id, req).await;
    (status, Json(body))
}

pub async fn pull_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Query(query): Query<PullQuery>,
) -> impl IntoResponse {
    let (status, body) = pull_inner(&state.manager, &id, query).await;
    (status, Json(body))
}

pub async fn end_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    req: Option<Json<EndRequest>>,
) -> impl IntoResponse {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = end_inner(&state.manager, &id, req).await;
    (status, Json(body))
}

// ============================================================================
// Push channel socket
// ============================================================================

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.manager.push().clone()))
}

/// One socket: a writer task draining `out`, plus one forwarding task per
/// joined topic. New sockets start on the global fallback topic; joining a
/// session moves them off it.
async fn handle_socket(socket: WebSocket, push: Arc<dyn PushChannel>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(64);
    let mut topics: HashMap<Topic, CancellationToken> = HashMap::new();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode push frame");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    join_topic(&mut topics, push.as_ref(), Topic::Global, &out_tx);
    tracing::debug!("Push socket connected");

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let reply = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::JoinSession { session_id }) => {
                leave_topic(&mut topics, Topic::Global);
                Some(join_topic(&mut topics, push.as_ref(), Topic::Session(session_id), &out_tx))
            }
            Ok(ClientFrame::LeaveSession { session_id }) => {
                let topic = Topic::Session(session_id);
                leave_topic(&mut topics, topic);
                Some(ControlFrame::Left {
                    topic: topic.to_string(),
                })
            }
            Ok(ClientFrame::JoinAgents) => Some(join_topic(&mut topics, push.as_ref(), Topic::Agents, &out_tx)),
            Ok(ClientFrame::CustomerTyping { session_id, is_typing }) => {
                push.customer_typing(session_id, is_typing);
                None
            }
            Ok(ClientFrame::Ping) => Some(ControlFrame::Pong),
            Err(e) => Some(ControlFrame::Error {
                message: format!("unrecognized frame: {}", e),
            }),
        };
        if let Some(reply) = reply {
            if out_tx.send(ServerFrame::Control(reply)).await.is_err() {
                break;
            }
        }
    }

    for (_, token) in topics.drain() {
        token.cancel();
    }
    drop(out_tx);
    let _ = writer.await;
    tracing::debug!("Push socket closed");
}

fn join_topic(
    topics: &mut HashMap<Topic, CancellationToken>,
    push: &dyn PushChannel,
    topic: Topic,
    out: &mpsc::Sender<ServerFrame>,
) -> ControlFrame {
    if !topics.contains_key(&topic) {
        let token = CancellationToken::new();
        tokio::spawn(forward_topic(push.subscribe(topic), topic, out.clone(), token.clone()));
        topics.insert(topic, token);
    }
    ControlFrame::Joined {
        topic: topic.to_string(),
    }
}

fn leave_topic(topics: &mut HashMap<Topic, CancellationToken>, topic: Topic) {
    if let Some(token) = topics.remove(&topic) {
        token.cancel();
    }
}

async fn forward_topic(
    mut rx: broadcast::Receiver<handoff_core::wire::PushEvent>,
    topic: Topic,
    out: mpsc::Sender<ServerFrame>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => {
                    if out.send(ServerFrame::Event(event)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(topic = %topic, skipped = n, "Push subscriber lagged; events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
