//! The capability the session state machine needs from a connection.
//!
//! Two framings sit behind this trait: a raw byte stream (TCP) and discrete
//! binary messages (WebSocket).  The session only ever asks for "exactly N
//! bytes", so both look the same from above.  The one place framing leaks
//! through is [`Transport::recv_handshake`]: on a message-oriented channel
//! each handshake reply must arrive as exactly one message of the expected
//! size.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a transport.  All of them end the session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// No data arrived within the read timeout.
    #[error("read timed out after {0:?}")]
    TimedOut(Duration),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A handshake message had the wrong size.
    #[error("protocol violation: expected a {expected}-byte message, got {actual} bytes")]
    UnexpectedLength { expected: usize, actual: usize },

    /// The WebSocket layer reported an error or an unusable frame.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl TransportError {
    /// Whether this is an ordinary end of session rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::TimedOut(_))
    }
}

/// Byte-level access to one client connection.
#[async_trait]
pub trait Transport: Send {
    /// Sends `bytes` as one unit (one write burst, or one WebSocket message).
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Receives one handshake reply of exactly `len` bytes.
    async fn recv_handshake(&mut self, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Receives exactly `len` bytes of the client message stream.
    async fn recv_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Discards whatever is immediately available, up to `max` bytes, waiting
    /// for at least one byte.  Returns the number of bytes discarded.
    async fn skip(&mut self, max: usize) -> Result<usize, TransportError>;

    /// Closes the connection.  Errors are ignored: the session is over anyway.
    async fn close(&mut self);
}
