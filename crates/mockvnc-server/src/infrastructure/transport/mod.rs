//! Concrete [`Transport`](crate::application::Transport) implementations.

pub mod tcp;
pub mod websocket;

pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;
