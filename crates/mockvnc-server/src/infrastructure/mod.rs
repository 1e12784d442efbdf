//! Infrastructure layer for mockvnc-server.
//!
//! Everything that touches the outside world: sockets, WebSocket upgrades,
//! image files, and the launcher that wires configured servers to listeners.

use std::time::Duration;

mod accept;
pub mod image_loader;
pub mod launcher;
pub mod tcp_server;
pub mod transport;
pub mod ws_server;

/// How often an idle accept loop re-checks the shutdown flag.
pub(crate) const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Pause after a failed `accept()` before trying again.
pub(crate) const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);
