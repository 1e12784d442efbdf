//! Per-connection RFB session: handshake, then the client message loop.
//!
//! ```text
//! server                                   client
//! ──────                                   ──────
//! "RFB 003.008\n"            ──────────▶
//!                            ◀──────────   12-byte version (unchecked)
//! [1, 1]  (one type: None)   ──────────▶
//!                            ◀──────────   1-byte choice (unchecked)
//! [0, 0, 0, 0]  (OK)         ──────────▶
//!                            ◀──────────   1-byte shared flag (unchecked)
//! ServerInit                 ──────────▶
//!                            ◀──────────   SetPixelFormat / SetEncodings /
//!                                          FramebufferUpdateRequest / ...
//! FramebufferUpdate (full)   ──────────▶
//! ```
//!
//! Every read is bounded by the configured read timeout.  Any transport
//! failure ends the session; there is no retry.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mockvnc_core::protocol::codec::{
    decode_pixel_format, decode_update_request, encode_framebuffer_update, encode_server_init,
};
use mockvnc_core::protocol::messages::{
    payload_len, RFB_VERSION, SECURITY_RESULT_OK, SECURITY_TYPES, VERSION_LEN,
};
use mockvnc_core::{
    overlay_text, ClientMessageType, FormatDecision, Framebuffer, PixelFormat, PixelFormatState,
    ProtocolError, ServerInit,
};

use crate::application::transport::{Transport, TransportError};
use crate::domain::config::{ServerConfig, DEFAULT_READ_TIMEOUT_SECS, DEFAULT_SERVER_NAME};

/// Largest chunk read at once when discarding a variable-length payload.
const DISCARD_CHUNK: usize = 64 * 1024;

/// Settings shared by every session of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Desktop name sent in ServerInit and used as the log prefix.
    pub server_name: String,
    /// Maximum wait for any single read.
    pub read_timeout: Duration,
    /// Stamp the client's IP onto its copy of the framebuffer.
    pub show_ip: bool,
}

impl SessionSettings {
    /// Session settings for one configured server.
    pub fn from_server_config(cfg: &ServerConfig) -> Self {
        Self {
            server_name: cfg.server_name.clone(),
            read_timeout: cfg.read_timeout(),
            show_ip: cfg.show_ip,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            server_name: DEFAULT_SERVER_NAME.to_string(),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            show_ip: false,
        }
    }
}

/// Handshake steps, used to say where a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    SendVersion,
    ReadVersion,
    SendSecurityTypes,
    ReadSecurityChoice,
    SendSecurityResult,
    ReadClientInit,
    SendServerInit,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeStep::SendVersion => "send version",
            HandshakeStep::ReadVersion => "read client version",
            HandshakeStep::SendSecurityTypes => "send security types",
            HandshakeStep::ReadSecurityChoice => "read security selection",
            HandshakeStep::SendSecurityResult => "send security result",
            HandshakeStep::ReadClientInit => "read client init",
            HandshakeStep::SendServerInit => "send server init",
        };
        f.write_str(s)
    }
}

/// Why a session ended.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{step} failed: {source}")]
    Handshake {
        step: HandshakeStep,
        #[source]
        source: TransportError,
    },

    #[error("failed to send framebuffer: {0}")]
    SendFramebuffer(#[source] TransportError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("encode error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// The underlying transport error, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            SessionError::Handshake { source, .. } => Some(source),
            SessionError::SendFramebuffer(e) | SessionError::Transport(e) => Some(e),
            SessionError::Protocol(_) => None,
        }
    }

    /// Whether the session ended because the client left or went idle.
    pub fn is_disconnect(&self) -> bool {
        self.transport_error()
            .is_some_and(TransportError::is_disconnect)
    }
}

/// State of one client connection.
pub struct Session<T> {
    transport: T,
    framebuffer: Arc<Framebuffer>,
    settings: Arc<SessionSettings>,
    formats: PixelFormatState,
    /// Encoded FramebufferUpdate for the current format.
    encoded_frame: Option<Vec<u8>>,
    id: Uuid,
    /// Log prefix: `[name] peer session=<id>`.
    label: String,
}

impl<T: Transport> Session<T> {
    /// Creates a session.  With `show_ip` enabled and a known peer, the
    /// session gets its own copy of the image with the peer's IP stamped on.
    pub fn new(
        transport: T,
        framebuffer: Arc<Framebuffer>,
        settings: Arc<SessionSettings>,
        peer: Option<SocketAddr>,
    ) -> Self {
        let framebuffer = match peer {
            Some(addr) if settings.show_ip => {
                Arc::new(overlay_text(&framebuffer, &addr.ip().to_canonical().to_string()))
            }
            _ => framebuffer,
        };
        // Every line a session logs carries its id so interleaved output
        // from concurrent clients can be told apart.
        let id = Uuid::new_v4();
        let label = match peer {
            Some(addr) => format!("[{}] {addr} session={id}", settings.server_name),
            None => format!("[{}] session={id}", settings.server_name),
        };
        Self {
            transport,
            framebuffer,
            settings,
            formats: PixelFormatState::default(),
            encoded_frame: None,
            id,
            label,
        }
    }

    /// Identifier attached to every log line of this session.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Log prefix for this session.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The pixel format currently used for updates.
    pub fn pixel_format(&self) -> &PixelFormat {
        self.formats.current()
    }

    /// The framebuffer this session serves.
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Runs the handshake and then the message loop until the connection ends.
    ///
    /// # Errors
    ///
    /// Always returns an error once the loop stops; check
    /// [`SessionError::is_disconnect`] to tell a normal hang-up from a fault.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.handshake().await?;
        self.message_loop().await
    }

    /// Closes the underlying transport.
    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    async fn handshake(&mut self) -> Result<(), SessionError> {
        self.send_step(HandshakeStep::SendVersion, RFB_VERSION)
            .await?;
        let version = self.recv_step(HandshakeStep::ReadVersion, VERSION_LEN).await?;
        debug!(
            "{}: client version {:?}",
            self.label,
            String::from_utf8_lossy(&version).trim_end()
        );

        self.send_step(HandshakeStep::SendSecurityTypes, &SECURITY_TYPES)
            .await?;
        self.recv_step(HandshakeStep::ReadSecurityChoice, 1).await?;
        self.send_step(HandshakeStep::SendSecurityResult, &SECURITY_RESULT_OK)
            .await?;

        self.recv_step(HandshakeStep::ReadClientInit, 1).await?;

        let init = encode_server_init(&ServerInit {
            width: self.framebuffer.width(),
            height: self.framebuffer.height(),
            pixel_format: *self.formats.current(),
            name: self.settings.server_name.clone(),
        })?;
        self.send_step(HandshakeStep::SendServerInit, &init).await?;
        debug!("{}: handshake complete", self.label);
        Ok(())
    }

    async fn send_step(&mut self, step: HandshakeStep, bytes: &[u8]) -> Result<(), SessionError> {
        self.transport
            .send(bytes)
            .await
            .map_err(|source| SessionError::Handshake { step, source })
    }

    async fn recv_step(&mut self, step: HandshakeStep, len: usize) -> Result<Vec<u8>, SessionError> {
        let limit = self.settings.read_timeout;
        let result = match timeout(limit, self.transport.recv_handshake(len)).await {
            Ok(r) => r,
            Err(_) => Err(TransportError::TimedOut(limit)),
        };
        result.map_err(|source| SessionError::Handshake { step, source })
    }

    // ── Message loop ──────────────────────────────────────────────────────────

    async fn message_loop(&mut self) -> Result<(), SessionError> {
        loop {
            // Each message is a type byte followed by a type-specific payload.
            // A payload that is not fully consumed would be read as the next
            // type byte, so every arm reads or discards its exact length.
            let msg_type = self.read(1).await?[0];

            match ClientMessageType::try_from(msg_type) {
                Ok(ClientMessageType::SetPixelFormat) => {
                    let body = self.read(payload_len::SET_PIXEL_FORMAT).await?;
                    // First 3 bytes are padding.
                    let candidate = decode_pixel_format(&body[3..])?;
                    self.apply_pixel_format(candidate);
                }
                Ok(ClientMessageType::SetEncodings) => {
                    let header = self.read(payload_len::SET_ENCODINGS_HEADER).await?;
                    let count = u16::from_be_bytes([header[1], header[2]]);
                    // Only raw is ever produced, whatever the client prefers.
                    self.discard(usize::from(count) * 4).await?;
                    debug!("{}: SetEncodings with {count} entries ignored", self.label);
                }
                Ok(ClientMessageType::FramebufferUpdateRequest) => {
                    // The image never changes, so incremental and full
                    // requests alike get the whole frame; the region is only
                    // logged.
                    let body = self.read(payload_len::FRAMEBUFFER_UPDATE_REQUEST).await?;
                    if let Ok(req) = decode_update_request(&body) {
                        debug!(
                            "{}: update request incremental={} {}x{}+{}+{}",
                            self.label, req.incremental, req.width, req.height, req.x, req.y
                        );
                    }
                    self.send_framebuffer().await?;
                }
                Ok(ClientMessageType::EnableContinuousUpdates) => {
                    self.discard(payload_len::ENABLE_CONTINUOUS_UPDATES).await?;
                }
                // Input events have no effect on a static image.
                Ok(ClientMessageType::KeyEvent) => {
                    self.discard(payload_len::KEY_EVENT).await?;
                }
                Ok(ClientMessageType::PointerEvent) => {
                    self.discard(payload_len::POINTER_EVENT).await?;
                }
                Ok(ClientMessageType::ClientCutText) => {
                    let header = self.read(payload_len::CLIENT_CUT_TEXT_HEADER).await?;
                    let len = u32::from_be_bytes([header[3], header[4], header[5], header[6]]);
                    self.discard(len as usize).await?;
                }
                Err(()) => {
                    // Payload length unknown: take whatever is already
                    // buffered (up to the cap) and carry on. A client that
                    // pipelines a known message behind this one may desync.
                    let skipped = self.skip(payload_len::UNKNOWN_SKIP).await?;
                    debug!(
                        "{}: unknown message type {msg_type}, skipped {skipped} bytes",
                        self.label
                    );
                }
            }
        }
    }

    fn apply_pixel_format(&mut self, candidate: PixelFormat) {
        match self.formats.offer(candidate) {
            FormatDecision::Accepted { signature } => {
                self.encoded_frame = None;
                info!("{}: client pixel format: {signature}", self.label);
            }
            FormatDecision::Rejected {
                signature,
                first_occurrence,
            } => {
                if first_occurrence {
                    warn!(
                        "{}: unsupported pixel format {signature}, ignoring",
                        self.label
                    );
                }
            }
        }
    }

    async fn send_framebuffer(&mut self) -> Result<(), SessionError> {
        if self.encoded_frame.is_none() {
            self.encoded_frame = Some(encode_framebuffer_update(
                &self.framebuffer,
                self.formats.encoder(),
            ));
        }
        if let Some(frame) = &self.encoded_frame {
            self.transport
                .send(frame)
                .await
                .map_err(SessionError::SendFramebuffer)?;
        }
        Ok(())
    }

    // ── Timed reads ───────────────────────────────────────────────────────────

    async fn read(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let limit = self.settings.read_timeout;
        match timeout(limit, self.transport.recv_exact(len)).await {
            Ok(r) => r,
            Err(_) => Err(TransportError::TimedOut(limit)),
        }
    }

    async fn discard(&mut self, mut len: usize) -> Result<(), TransportError> {
        while len > 0 {
            let chunk = len.min(DISCARD_CHUNK);
            self.read(chunk).await?;
            len -= chunk;
        }
        Ok(())
    }

    async fn skip(&mut self, max: usize) -> Result<usize, TransportError> {
        let limit = self.settings.read_timeout;
        match timeout(limit, self.transport.skip(max)).await {
            Ok(r) => r,
            Err(_) => Err(TransportError::TimedOut(limit)),
        }
    }
}

/// Serves one accepted connection from handshake to disconnect.
///
/// This is the single entry point the listeners call per connection.  The
/// outcome is logged here and the transport is always closed.
///
/// # Parameters
///
/// - `transport`: the accepted connection, already upgraded for WebSocket.
/// - `framebuffer`: the server's shared image; copied only when `show_ip`
///   stamps the peer address onto it.
/// - `settings`: desktop name, read timeout and overlay flag of the server.
/// - `peer`: remote address, used in the log label and the IP overlay.
pub async fn run_session<T: Transport>(
    transport: T,
    framebuffer: Arc<Framebuffer>,
    settings: Arc<SessionSettings>,
    peer: SocketAddr,
) {
    let mut session = Session::new(transport, framebuffer, settings, Some(peer));
    let label = session.label().to_string();
    info!("{label}: client connected");

    let outcome = session.run().await;
    // Closed on every path: TCP gets a shutdown, WebSocket a Close frame.
    session.close().await;

    match outcome {
        Ok(()) => info!("{label}: client disconnected"),
        Err(e) => match e.transport_error() {
            Some(TransportError::Closed) => info!("{label}: client disconnected"),
            Some(TransportError::TimedOut(_)) => {
                info!("{label}: read timeout, closing connection")
            }
            _ => warn!("{label}: session ended: {e}"),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
