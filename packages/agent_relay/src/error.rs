//! Error types for relay delivery.

use thiserror::Error;

/// Failure delivering one frame to one peer connection.
///
/// Delivery errors never surface from the publish operations: a `Closed`
/// peer is detached during fan-out, and a `Full` peer drops that frame
/// while staying attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The peer's channel is gone; its connection task has stopped.
    #[error("peer channel closed")]
    Closed,
    /// The peer's send buffer is full; the consumer is not keeping up.
    #[error("peer send buffer full")]
    Full,
}
