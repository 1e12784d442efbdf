//! mockvnc-server library crate.
//!
//! Serves a static image to VNC clients over plain TCP or over WebSocket
//! (noVNC).  Clients can look but not touch: input events are read and
//! dropped.
//!
//! # Architecture
//!
//! ```text
//! VNC viewer (RFB/TCP)        noVNC (RFB in binary WebSocket messages)
//!         ↕                               ↕
//! [mockvnc-server]
//!   ├── domain/            TOML config schema, listen-address expansion
//!   ├── application/       Transport trait, RFB session state machine
//!   └── infrastructure/
//!         ├── transport/   TCP and WebSocket adapters
//!         ├── tcp_server   accept loop (tokio)
//!         ├── ws_server    upgrade + accept loop (tokio-tungstenite)
//!         ├── image_loader PNG/JPEG → framebuffer (image)
//!         └── launcher     config → running listeners
//! ```
//!
//! # Layer rules
//!
//! - `domain` knows nothing about sockets or sessions.
//! - `application` depends on `domain` and `mockvnc-core`; it sees
//!   connections only through [`application::Transport`].
//! - `infrastructure` depends on everything else plus tokio and tungstenite.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: the session state machine.
pub mod application;

/// Infrastructure layer: sockets, WebSocket upgrades, image files.
pub mod infrastructure;
