//! RFB carried in binary WebSocket messages (the noVNC framing).
//!
//! During the handshake each client reply must arrive as a single binary
//! message of exactly the expected size.  After that the messages are treated
//! as a byte stream: a client may pack several RFB messages into one frame, or
//! split one across frames, and both parse correctly.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::application::transport::{Transport, TransportError};

/// Message-oriented transport over an upgraded WebSocket connection.
pub struct WebSocketTransport<S> {
    ws: WebSocketStream<S>,
    /// Bytes received but not yet consumed by the session.
    pending: Vec<u8>,
}

impl<S> WebSocketTransport<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self {
            ws,
            pending: Vec::new(),
        }
    }
}

fn map_ws_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => TransportError::Closed,
        WsError::Io(io) => match io.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => TransportError::Closed,
            _ => TransportError::Io(io),
        },
        other => TransportError::WebSocket(other.to_string()),
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Waits for the next binary message, skipping control frames.
    async fn next_binary(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let msg = match self.ws.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => return Err(TransportError::Closed),
            };
            match msg {
                WsMessage::Binary(data) => return Ok(data),
                WsMessage::Text(_) => {
                    return Err(TransportError::WebSocket(
                        "text frame received, RFB requires binary frames".to_string(),
                    ))
                }
                WsMessage::Close(_) => return Err(TransportError::Closed),
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
                    debug!("websocket control frame ignored");
                }
            }
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.ws
            .send(WsMessage::Binary(bytes.to_vec()))
            .await
            .map_err(map_ws_error)
    }

    async fn recv_handshake(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let msg = self.next_binary().await?;
        if msg.len() != len {
            return Err(TransportError::UnexpectedLength {
                expected: len,
                actual: msg.len(),
            });
        }
        Ok(msg)
    }

    async fn recv_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        while self.pending.len() < len {
            let msg = self.next_binary().await?;
            self.pending.extend_from_slice(&msg);
        }
        Ok(self.pending.drain(..len).collect())
    }

    async fn skip(&mut self, max: usize) -> Result<usize, TransportError> {
        while self.pending.is_empty() && max > 0 {
            self.pending = self.next_binary().await?;
        }
        let n = max.min(self.pending.len());
        self.pending.drain(..n);
        Ok(n)
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
