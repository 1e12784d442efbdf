//! Domain layer for mockvnc-server.
//!
//! Configuration structures with no I/O beyond reading the config file
//! itself.  Sockets, images, and sessions live in the outer layers.

pub mod config;

pub use config::{AppConfig, ConfigError, ServerConfig, TransportKind};
