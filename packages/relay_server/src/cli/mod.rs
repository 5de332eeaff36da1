//! Client subcommands for talking to a running relay server.

pub mod agent;
pub mod stats;
pub mod watch;

pub use agent::agent_command;
pub use stats::stats_command;
pub use watch::watch_command;

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("server rejected the websocket handshake (HTTP {0})")]
    HandshakeRejected(u16),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServerError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }

    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unavailable
            }
            tungstenite::Error::Http(response) => {
                Self::HandshakeRejected(response.status().as_u16())
            }
            other => Self::Other(other.into()),
        }
    }
}

/// Open a WebSocket to the server. Connect failures are classified here
/// (`Unavailable` for a dead server, `HandshakeRejected` when it answers
/// but refuses the upgrade); everything after a successful connect
/// reports errors through anyhow.
pub(crate) async fn connect(
    url: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    ServerError,
> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(ServerError::from_tungstenite)?;
    Ok(ws_stream)
}
