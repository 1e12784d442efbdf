//! RFB over a plain byte stream.
//!
//! Generic over the stream type so tests can substitute an in-memory duplex
//! or a scripted mock for a real `TcpStream`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::application::transport::{Transport, TransportError};

/// Byte-stream transport.  Message boundaries do not exist at this layer.
pub struct TcpTransport<S> {
    stream: S,
}

impl<S> TcpTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn map_read_error(e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted => TransportError::Closed,
        _ => TransportError::Io(e),
    }
}

#[async_trait]
impl<S> Transport for TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv_handshake(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        self.recv_exact(len).await
    }

    async fn recv_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .await
            .map_err(map_read_error)?;
        Ok(buf)
    }

    async fn skip(&mut self, max: usize) -> Result<usize, TransportError> {
        let mut buf = vec![0u8; max];
        let n = self.stream.read(&mut buf).await.map_err(map_read_error)?;
        if n == 0 && max > 0 {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
