//! # wsrpc Gateway
//!
//! Bidirectional JSON-RPC 2.0 over WebSocket.
//!
//! Each connected peer can both call methods registered on the [`Router`]
//! and be called by it. Inbound frames from every connection funnel through
//! one queue into a single dispatch engine, which runs method handlers for
//! requests and completion callbacks for responses.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Connection state and pending-request table.
pub mod connection;
mod dispatch;
/// Connection lifecycle events.
pub mod events;
/// Method handler types.
pub mod handler;
mod ingest;
/// Connection registry and handler table.
pub mod router;
mod sender;
mod server;
/// Frame-level transport abstraction.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use connection::{Connection, PendingRequest, ResponseCallback};
pub use dispatch::Inbound;
pub use events::{ConnectionEvent, EventBroadcaster, EventEnvelope};
pub use handler::{HandlerError, HandlerResult};
pub use ingest::{CLOSE_GOING_AWAY, CLOSE_INVALID_PAYLOAD};
pub use router::{CloseHandler, Router};
pub use sender::SendError;
pub use server::{Gateway, GatewayBuilder, GatewayConfig};
pub use transport::{Frame, FrameSink, TransportError};

/// Start a gateway with no handlers and serve until interrupted.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: GatewayConfig) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The dispatch engine was already started.
    #[error("Dispatch engine already started")]
    AlreadyStarted,
}
