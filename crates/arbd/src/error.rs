use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur during arbiter operation.
#[derive(Error, Debug)]
pub enum ArbiterError {
    /// The inbound listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// An outbound connection to a configured device could not be opened.
    #[error("failed to connect to device {addr}: {reason}")]
    Connect {
        /// Device address as configured.
        addr: String,
        /// Why the attempt failed.
        reason: String,
    },
    /// Accepting an inbound TCP connection failed.
    #[error("accept error: {0}")]
    Accept(std::io::Error),
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Binary message encoding or decoding error.
    #[error("message error: {0}")]
    Message(#[from] arb_common::MessageError),
    /// The peer sent something that is not a message frame.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed by the remote peer or locally.
    #[error("connection closed")]
    ConnectionClosed,
}
