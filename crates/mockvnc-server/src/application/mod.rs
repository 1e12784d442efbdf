//! Application layer for mockvnc-server.
//!
//! The [`transport::Transport`] seam and the per-connection session state
//! machine that drives it.

pub mod session;
pub mod transport;

pub use session::{run_session, Session, SessionError, SessionSettings};
pub use transport::{Transport, TransportError};
