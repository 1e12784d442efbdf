//! Domain types for the mock VNC server.
//!
//! Pure data and rules with no I/O: the served image, the per-session pixel
//! format state, and the text overlay.

pub mod framebuffer;
pub mod negotiation;
pub mod overlay;
