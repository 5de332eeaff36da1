//! WebSocket transport for the relay.

pub mod protocol;
pub mod session;
