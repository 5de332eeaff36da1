pub mod health;
pub mod ws;

// Re-export all handlers for easy route registration
pub use health::{health_handler, metrics_handler, root_handler};
pub use ws::{agent_ws_handler, relay_stats_handler, user_ws_handler};
