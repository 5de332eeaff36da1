use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio_tungstenite::tungstenite;

use agent_relay::AgentForward;

use crate::cli::ServerError;
use crate::ws::protocol::AgentFrame;

/// Act as the agent side of a relay: publish stdin lines to every watcher
/// and print user messages as they are forwarded back.
pub async fn agent_command(server: &str, agent_id: &str, api_key: Option<&str>) -> Result<()> {
    let mut url = format!("{server}/v1/ws/agent/{agent_id}");
    if let Some(key) = api_key {
        url.push_str(&format!("?api_key={key}"));
    }
    let ws_stream = match super::connect(&url).await {
        Ok(ws) => ws,
        Err(ServerError::Unavailable) => {
            eprintln!("[relayd: no server at {server}]");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    eprintln!("[relayd: publishing as agent {agent_id}]");
    agent_session(ws_stream).await
}

async fn agent_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Result<()> {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let frame = AgentFrame::Message {
                            content: line,
                            msg_type: None,
                            metadata: None,
                        };
                        let json = serde_json::to_string(&frame)?;
                        if ws_write.send(tungstenite::Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Ok(AgentForward::UserMessage { content, user_id }) =
                            serde_json::from_str::<AgentForward>(&text)
                        {
                            println!("[{user_id}] {content}");
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        eprintln!("[relayd: connection error: {e}]");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    eprintln!("[relayd: disconnected]");
    Ok(())
}
