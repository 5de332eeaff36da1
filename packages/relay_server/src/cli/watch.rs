use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio_tungstenite::tungstenite;

use agent_relay::{Message, SenderRole};

use crate::cli::ServerError;
use crate::ws::protocol::UserFrame;

/// Watch an agent's stream from the terminal. Lines typed on stdin are
/// sent to the agent (and echoed to every watcher, this one included).
pub async fn watch_command(server: &str, agent_id: &str, user_id: &str) -> Result<()> {
    let url = format!("{server}/v1/ws/user/{agent_id}?user_id={user_id}");
    let ws_stream = match super::connect(&url).await {
        Ok(ws) => ws,
        Err(ServerError::Unavailable) => {
            eprintln!("[relayd: no server at {server}]");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    watch_session(ws_stream).await
}

async fn watch_session(
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
                        let frame = UserFrame::Message { content: line };
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
                        // Pongs and anything else non-transcript are skipped.
                        if let Ok(message) = serde_json::from_str::<Message>(&text) {
                            print_message(&message);
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

fn print_message(message: &Message) {
    let time = message.timestamp.format("%H:%M:%S");
    match message.sender {
        SenderRole::Agent => println!("{time} <{}> {}", message.agent_id, message.content),
        SenderRole::User => {
            let user = message.user_id().unwrap_or("user");
            println!("{time} [{user}] {}", message.content);
        }
        SenderRole::System => println!("{time} * {}", message.content),
    }
}
