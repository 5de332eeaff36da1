use agent_relay::{
    DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_LIMIT, DEFAULT_SEND_BUFFER, RelayConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Unified config (figment-deserialized from defaults / relayd.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   relayd.toml:     [server]
//                    port = 9000
//
//   env var:         RELAY_SERVER__PORT=9000   (double underscore = nesting)
//
// (single underscore stays within field names: RELAY_RELAY__HISTORY_CAPACITY)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
}

/// Bind settings (lives under `[server]` in relayd.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Relay tuning knobs (lives under `[relay]` in relayd.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            replay_limit: default_replay_limit(),
            send_buffer: default_send_buffer(),
        }
    }
}

impl RelayFileConfig {
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            history_capacity: self.history_capacity,
            replay_limit: self.replay_limit,
            send_buffer: self.send_buffer,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}
fn default_replay_limit() -> usize {
    DEFAULT_REPLAY_LIMIT
}
fn default_send_buffer() -> usize {
    DEFAULT_SEND_BUFFER
}

/// Build a figment that layers: defaults → relayd.toml → RELAY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RELAY_SERVER__PORT=9000`  →  `server.port = 9000`
///   `RELAY_RELAY__REPLAY_LIMIT=20`  →  `relay.replay_limit = 20`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path.unwrap_or_else(|| Path::new("relayd.toml"));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RELAY_").split("__"))
}
