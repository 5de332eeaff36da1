use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod cli;
mod config;
mod handlers;
mod metrics;
mod ws;

use agent_relay::Relay;

use crate::config::FileConfig;
use crate::metrics::ServerMetrics;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "relayd")]
#[command(about = "WebSocket relay between agents and their watching users")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a TOML config file (defaults to ./relayd.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    Serve(ServeArgs),

    /// Watch an agent's stream and send messages to it
    Watch(WatchArgs),

    /// Connect as an agent and publish stdin lines to watchers
    Agent(AgentArgs),

    /// Print connection stats from a running server
    Stats(StatsArgs),
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Port for the web server
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct WatchArgs {
    /// Agent ID to watch
    agent_id: String,

    /// User ID to present to the server
    #[arg(long, default_value = "anonymous")]
    user_id: String,

    /// Server WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8000")]
    server: String,
}

#[derive(Parser)]
struct AgentArgs {
    /// Agent ID to publish as
    agent_id: String,

    /// API key to present to the server
    #[arg(long)]
    api_key: Option<String>,

    /// Server WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8000")]
    server: String,
}

#[derive(Parser)]
struct StatsArgs {
    /// Server HTTP URL
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub relay: Arc<Relay>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Bare `relayd`: serve with defaults
        None => run_server(ServeArgs::default(), cli.config).await,
        Some(Commands::Serve(args)) => run_server(args, cli.config).await,
        Some(Commands::Watch(args)) => {
            cli::watch_command(&args.server, &args.agent_id, &args.user_id).await
        }
        Some(Commands::Agent(args)) => {
            cli::agent_command(&args.server, &args.agent_id, args.api_key.as_deref()).await
        }
        Some(Commands::Stats(args)) => cli::stats_command(&args.server, args.json).await,
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/v1/ws/stats", get(handlers::relay_stats_handler))
        .route("/v1/ws/user/{agent_id}", get(handlers::user_ws_handler))
        .route("/v1/ws/agent/{agent_id}", get(handlers::agent_ws_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "relayd=debug,agent_relay=debug,tower_http=debug,info"
    } else {
        "relayd=info,agent_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Agent Relay");

    let mut file_config: FileConfig = config::load_config(config_path.as_deref())
        .extract()
        .context("Failed to load configuration")?;

    // CLI flags win over file and environment settings
    if let Some(port) = args.port {
        file_config.server.port = port;
    }
    if let Some(host) = args.host {
        file_config.server.host = host;
    }

    info!(
        "Relay config: history_capacity={}, replay_limit={}, send_buffer={}",
        file_config.relay.history_capacity,
        file_config.relay.replay_limit,
        file_config.relay.send_buffer
    );

    let state = AppState {
        relay: Arc::new(Relay::new(file_config.relay.to_relay_config())),
        metrics: Arc::new(ServerMetrics::new()),
    };

    let app = build_router(state);

    let addr =
        format!("{}:{}", file_config.server.host, file_config.server.port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Agent Relay listening on http://{}", actual_addr);
    info!("");
    info!("Endpoints:");
    info!("  GET /health                 - Health check");
    info!("  GET /metrics                - Server metrics");
    info!("  GET /v1/ws/stats            - Relay connection stats");
    info!("  GET /v1/ws/user/:agent_id   - WebSocket for watching users");
    info!("  GET /v1/ws/agent/:agent_id  - WebSocket for the agent");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Shutdown complete");
    server_result
}
