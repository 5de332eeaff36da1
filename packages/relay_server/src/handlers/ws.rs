use axum::{
    Json,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::AppState;
use crate::ws::session;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    user_id: Option<String>,
}

/// Watcher endpoint: `GET /v1/ws/user/{agent_id}?user_id=...`
pub async fn user_ws_handler(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<UserQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = query.user_id.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| session::run_user_session(socket, state, agent_id, user_id))
}

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    api_key: Option<String>,
}

/// Agent endpoint: `GET /v1/ws/agent/{agent_id}?api_key=...`
pub async fn agent_ws_handler(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<AgentQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // api_key is accepted but not validated yet.
    if query.api_key.is_some() {
        debug!("agent {agent_id} presented an api key");
    }
    ws.on_upgrade(move |socket| session::run_agent_session(socket, state, agent_id))
}

/// Live connection counts from the relay.
pub async fn relay_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.stats().await)
}
