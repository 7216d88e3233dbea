//! HTTP and WebSocket transports.
//!
//! An axum router with bearer-token middleware fronting the same
//! [`ToolRegistry`] the stdio transport uses, so behavior never diverges by
//! transport.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use super::ToolRegistry;
use crate::session::SessionEvent;
use crate::types::SessionId;

#[derive(Clone)]
struct AppState {
    registry: Arc<ToolRegistry>,
    auth_secret: Option<String>,
}

pub fn router(registry: Arc<ToolRegistry>, auth_secret: Option<String>) -> Router {
    let state = AppState { registry, auth_secret };
    Router::new()
        .route("/mcp", post(handle_post).get(handle_sse))
        .route("/mcp/ws", get(handle_ws))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .with_state(state)
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.auth_secret else {
        return Ok(());
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Result<Json<JsonRpcResponse>, StatusCode> {
    check_auth(&state, &headers)?;
    let response = state.registry.handle(request).await;
    Ok(Json(response))
}

async fn handle_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if check_auth(&state, &headers).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| ws_loop(socket, state.registry))
}

#[derive(serde::Deserialize)]
struct SseQuery {
    session_id: String,
}

/// Replays a session's history from `Last-Event-Id` (or the start), then
/// follows live events, letting a client resume a dropped SSE connection
/// without missing or duplicating events.
async fn handle_sse(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    check_auth(&state, &headers)?;

    let session_id = query
        .session_id
        .parse::<uuid::Uuid>()
        .map(SessionId)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let from_index = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(|i| i + 1)
        .unwrap_or(0);

    let sessions = state.registry.runtime().sessions.clone();
    let backlog: Vec<SessionEvent> = sessions
        .history(session_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?
        .into_iter()
        .filter(|e| e.index >= from_index)
        .collect();

    let rx = sessions.subscribe_from(session_id, from_index);
    let backlog_stream = stream::iter(backlog).map(|e| Ok(session_event_to_sse(e)));
    let live_stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(session_event_to_sse(event)), rx)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(backlog_stream.chain(live_stream)).keep_alive(KeepAlive::default()))
}

fn session_event_to_sse(event: SessionEvent) -> Event {
    Event::default()
        .id(event.index.to_string())
        .event(event.event_type)
        .data(event.payload.to_string())
}

/// Binds `addr` and serves the MCP router until the process is terminated.
pub async fn serve(addr: &str, registry: Arc<ToolRegistry>, auth_secret: Option<String>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(registry, auth_secret)).await
}

async fn ws_loop(mut socket: WebSocket, registry: Arc<ToolRegistry>) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let response = match serde_json::from_str::<JsonRpcRequest>(&text) {
            Ok(request) => registry.handle(request).await,
            Err(_) => JsonRpcResponse::parse_error(),
        };
        let Ok(payload) = serde_json::to_string(&response) else {
            break;
        };
        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }
}
