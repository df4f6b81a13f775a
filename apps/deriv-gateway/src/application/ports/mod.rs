//! Transport Ports
//!
//! The multiplexer and lifecycle never touch a socket directly; they
//! speak to these ports. Production uses the tokio-tungstenite adapter
//! in `infrastructure::deriv::ws`; tests substitute in-memory channel
//! transports.

use async_trait::async_trait;

/// Socket-level failure. Absorbed by the lifecycle's reconnect loop
/// rather than surfaced per-call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The underlying websocket reported an error.
    #[error("websocket failure: {0}")]
    WebSocket(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

/// Outbound half of a message-oriented connection.
///
/// Frame writes are serialized by the multiplexer; implementations do
/// not need to be re-entrant.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete text frame.
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the outbound half.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a message-oriented connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next complete text frame.
    ///
    /// Returns `None` when the peer has closed the connection.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens new connections to the remote endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url` and return its two halves.
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError>;
}
