//! WebSocket session loops.
//!
//! Each accepted socket is driven by one session: a watcher session
//! drains the relay feed out to the user, an agent session drains user
//! forwards out to the agent, and both decode inbound frames into relay
//! publishes. Sessions detach their connection on every exit path, so
//! the relay never holds a socket that is gone.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use agent_relay::MessageKind;

use crate::AppState;

use super::protocol::{AgentFrame, ControlFrame, UserFrame};

/// Drive a watcher connection.
///
/// The relay pre-loads the outbound channel with the greeting and a
/// history replay, so the client sees those before any live traffic.
pub async fn run_user_session(
    socket: WebSocket,
    state: AppState,
    agent_id: String,
    user_id: String,
) {
    let (conn, mut relay_rx) = state.relay.attach_user(&agent_id, &user_id).await;
    state.metrics.connection_opened();
    info!("user {user_id} watching agent {agent_id} ({conn})");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Bridge channel to the socket, so the input side can answer pings.
    let (tx, mut rx) = mpsc::channel::<String>(100);

    // Forward relay traffic into the bridge. Ends when the relay drops
    // this connection (detach or dead-peer cleanup).
    let tx_relay = tx.clone();
    let relay_task = async move {
        while let Some(message) = relay_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize relay message: {}", e);
                    continue;
                }
            };
            if tx_relay.send(json).await.is_err() {
                break;
            }
        }
    };

    // Drain the bridge into the socket.
    let metrics_out = state.metrics.clone();
    let sender_task = async move {
        while let Some(json) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
            metrics_out.message_sent();
        }
    };

    // Decode inbound frames into relay publishes.
    let relay_in = state.relay.clone();
    let metrics_in = state.metrics.clone();
    let input_agent_id = agent_id.clone();
    let input_user_id = user_id.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    metrics_in.message_received();
                    match serde_json::from_str::<UserFrame>(&text) {
                        Ok(UserFrame::Message { content }) => {
                            relay_in
                                .publish_from_user(&input_agent_id, &input_user_id, content)
                                .await;
                        }
                        Ok(UserFrame::Ping) => {
                            if tx.send(ControlFrame::Pong.to_json()).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            metrics_in.decode_error();
                            debug!("undecodable frame from user {input_user_id}: {err}");
                        }
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                // Binary frames and ws-level ping/pong are ignored.
                Ok(_) => {}
                Err(err) => {
                    metrics_in.websocket_error();
                    debug!("websocket error from user {input_user_id}: {err}");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = relay_task => debug!("Relay task ended"),
        _ = sender_task => debug!("Sender task ended"),
        _ = input_task => debug!("Input task ended"),
    }

    state.relay.detach(conn).await;
    state.metrics.connection_closed();
    info!("user {user_id} stopped watching agent {agent_id} ({conn})");
}

/// Drive the agent connection for `agent_id`.
///
/// When the session ends, the watchers get an "Agent disconnected"
/// status, mirroring the "Agent connected" they saw at attach.
pub async fn run_agent_session(socket: WebSocket, state: AppState, agent_id: String) {
    let (conn, mut forward_rx) = state.relay.attach_agent(&agent_id).await;
    state.metrics.connection_opened();
    info!("agent {agent_id} connected ({conn})");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(100);

    // Forward reduced user messages into the bridge.
    let tx_forward = tx.clone();
    let forward_task = async move {
        while let Some(forward) = forward_rx.recv().await {
            let json = match serde_json::to_string(&forward) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize user forward: {}", e);
                    continue;
                }
            };
            if tx_forward.send(json).await.is_err() {
                break;
            }
        }
    };

    let metrics_out = state.metrics.clone();
    let sender_task = async move {
        while let Some(json) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
            metrics_out.message_sent();
        }
    };

    let relay_in = state.relay.clone();
    let metrics_in = state.metrics.clone();
    let input_agent_id = agent_id.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    metrics_in.message_received();
                    match serde_json::from_str::<AgentFrame>(&text) {
                        Ok(AgentFrame::Message {
                            content,
                            msg_type,
                            metadata,
                        }) => {
                            relay_in
                                .publish_from_agent(
                                    &input_agent_id,
                                    content,
                                    msg_type.unwrap_or(MessageKind::AgentMessage),
                                    metadata,
                                )
                                .await;
                        }
                        Ok(AgentFrame::Status { content, metadata }) => {
                            relay_in
                                .publish_from_agent(
                                    &input_agent_id,
                                    content,
                                    MessageKind::Status,
                                    metadata,
                                )
                                .await;
                        }
                        Ok(AgentFrame::Ping) => {
                            if tx.send(ControlFrame::Pong.to_json()).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            metrics_in.decode_error();
                            debug!("undecodable frame from agent {input_agent_id}: {err}");
                        }
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    metrics_in.websocket_error();
                    debug!("websocket error from agent {input_agent_id}: {err}");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = forward_task => debug!("Forward task ended"),
        _ = sender_task => debug!("Sender task ended"),
        _ = input_task => debug!("Input task ended"),
    }

    state.relay.detach(conn).await;
    state
        .relay
        .publish_system(&agent_id, MessageKind::Status, "Agent disconnected")
        .await;
    state.metrics.connection_closed();
    info!("agent {agent_id} disconnected ({conn})");
}

#[cfg(test)]
mod tests {
    use crate::AppState;
    use crate::metrics::ServerMetrics;
    use agent_relay::{Relay, RelayStats};
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn spawn_server() -> SocketAddr {
        let state = AppState {
            relay: Arc::new(Relay::default()),
            metrics: Arc::new(ServerMetrics::new()),
        };
        let app = crate::build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn connect(url: String) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    /// Next text frame as JSON, failing the test after 5s instead of
    /// hanging it.
    async fn next_json(ws: &mut Client) -> serde_json::Value {
        let text = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(tungstenite::Message::Text(text))) => break text.to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("websocket ended early: {other:?}"),
                }
            }
        })
        .await
        .expect("timed out waiting for frame");
        serde_json::from_str(&text).unwrap()
    }

    async fn send_json(ws: &mut Client, value: serde_json::Value) {
        ws.send(tungstenite::Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    /// Ping and await the pong. Frames are processed in order per
    /// connection, so this doubles as a barrier: everything sent before
    /// the ping has been published once the pong arrives.
    async fn ping_barrier(ws: &mut Client) {
        send_json(ws, json!({"type": "ping"})).await;
        assert_eq!(next_json(ws).await["type"], "pong");
    }

    #[tokio::test]
    async fn user_gets_greeting_on_connect() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha?user_id=mira")).await;

        let greeting = next_json(&mut user).await;
        assert_eq!(greeting["type"], "system");
        assert_eq!(greeting["sender"], "system");
        assert_eq!(greeting["content"], "Connected to agent alpha");
        assert_eq!(greeting["agent_id"], "alpha");
    }

    #[tokio::test]
    async fn ping_answered_with_pong() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha")).await;
        next_json(&mut user).await; // greeting

        ping_barrier(&mut user).await;
    }

    #[tokio::test]
    async fn agent_message_reaches_watcher() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha?user_id=mira")).await;
        next_json(&mut user).await; // greeting

        let mut agent = connect(format!("ws://{addr}/v1/ws/agent/alpha")).await;
        let status = next_json(&mut user).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["content"], "Agent connected");

        send_json(&mut agent, json!({"type": "message", "content": "hello from agent"})).await;
        let message = next_json(&mut user).await;
        assert_eq!(message["type"], "agent_message");
        assert_eq!(message["sender"], "agent");
        assert_eq!(message["content"], "hello from agent");
    }

    #[tokio::test]
    async fn status_frame_published_with_status_kind() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha")).await;
        next_json(&mut user).await; // greeting

        let mut agent = connect(format!("ws://{addr}/v1/ws/agent/alpha")).await;
        next_json(&mut user).await; // "Agent connected"

        send_json(
            &mut agent,
            json!({"type": "status", "content": "compiling", "metadata": {"step": 1}}),
        )
        .await;
        let status = next_json(&mut user).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["sender"], "agent");
        assert_eq!(status["content"], "compiling");
        assert_eq!(status["metadata"]["step"], 1);
    }

    #[tokio::test]
    async fn user_message_echoes_and_reaches_agent() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha?user_id=mira")).await;
        next_json(&mut user).await; // greeting

        let mut agent = connect(format!("ws://{addr}/v1/ws/agent/alpha")).await;
        next_json(&mut user).await; // "Agent connected"

        send_json(&mut user, json!({"type": "message", "content": "status?"})).await;

        let forward = next_json(&mut agent).await;
        assert_eq!(forward["type"], "user_message");
        assert_eq!(forward["content"], "status?");
        assert_eq!(forward["user_id"], "mira");

        let echo = next_json(&mut user).await;
        assert_eq!(echo["type"], "user_message");
        assert_eq!(echo["sender"], "user");
        assert_eq!(echo["content"], "status?");
        assert_eq!(echo["metadata"]["user_id"], "mira");
    }

    #[tokio::test]
    async fn malformed_frame_skipped_and_connection_survives() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha")).await;
        next_json(&mut user).await; // greeting

        send_json(&mut user, json!({"type": "resize", "rows": 40})).await;
        ping_barrier(&mut user).await;
    }

    #[tokio::test]
    async fn agent_disconnect_notifies_watchers() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha")).await;
        next_json(&mut user).await; // greeting

        let mut agent = connect(format!("ws://{addr}/v1/ws/agent/alpha")).await;
        next_json(&mut user).await; // "Agent connected"

        agent.close(None).await.unwrap();
        let status = next_json(&mut user).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["content"], "Agent disconnected");
        assert_eq!(status["sender"], "system");
    }

    #[tokio::test]
    async fn replay_covers_messages_sent_before_attach() {
        let addr = spawn_server().await;
        let mut agent = connect(format!("ws://{addr}/v1/ws/agent/alpha")).await;
        for n in 1..=3 {
            send_json(&mut agent, json!({"type": "message", "content": format!("msg-{n}")})).await;
        }
        ping_barrier(&mut agent).await;

        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha")).await;
        let mut contents = Vec::new();
        for _ in 0..5 {
            contents.push(next_json(&mut user).await["content"].as_str().unwrap().to_string());
        }
        assert_eq!(
            contents,
            [
                "Connected to agent alpha",
                "Agent connected",
                "msg-1",
                "msg-2",
                "msg-3"
            ]
        );
    }

    #[tokio::test]
    async fn stats_report_live_connections() {
        let addr = spawn_server().await;
        let mut user = connect(format!("ws://{addr}/v1/ws/user/alpha?user_id=mira")).await;
        next_json(&mut user).await; // greeting: user attach is complete

        let mut agent = connect(format!("ws://{addr}/v1/ws/agent/alpha")).await;
        next_json(&mut user).await; // "Agent connected": agent attach is complete

        let stats: RelayStats = reqwest::get(format!("http://{addr}/v1/ws/stats"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats.total_user_connections, 1);
        assert_eq!(stats.total_agent_connections, 1);
        assert_eq!(stats.agents_with_watchers, ["alpha"]);
        assert_eq!(stats.connected_agents, ["alpha"]);

        // Keep the agent alive until the assertions are done.
        agent.close(None).await.unwrap();
    }
}
