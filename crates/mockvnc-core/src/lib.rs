//! # mockvnc-core
//!
//! Shared library for the mock VNC server containing the RFB wire codec,
//! the pixel format converter, and the framebuffer domain types.
//!
//! This crate has zero dependencies on sockets, async runtimes, or image
//! decoders.  The server crate feeds it a ready-made [`Framebuffer`] and asks
//! it for bytes to put on the wire.
//!
//! # Architecture overview
//!
//! - **`protocol`** – How bytes travel over the network.  Fixed handshake
//!   constants, the 16-byte `PixelFormat` structure, ServerInit and
//!   FramebufferUpdate encoding, and the per-pixel encoder selected from the
//!   client's requested format.
//!
//! - **`domain`** – The served image (`Framebuffer`), the per-session pixel
//!   format negotiation state, and the text overlay used to stamp a client's
//!   IP address onto its private copy of the image.

pub mod domain;
pub mod protocol;

pub use domain::framebuffer::{Framebuffer, FramebufferError};
pub use domain::negotiation::{FormatDecision, PixelFormatState};
pub use domain::overlay::overlay_text;
pub use protocol::codec::ProtocolError;
pub use protocol::messages::{ClientMessageType, PixelFormat, ServerInit};
pub use protocol::pixel::PixelEncoder;
