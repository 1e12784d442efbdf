//! WebSocket listener for browser clients such as noVNC.
//!
//! The accept loop never performs the HTTP upgrade itself: each accepted
//! socket is handed to its own task, which upgrades it and then runs an
//! ordinary RFB session over binary WebSocket messages.  Only requests for
//! the configured path are upgraded; anything else gets a 404.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{info, warn};

use mockvnc_core::Framebuffer;

use crate::application::session::{run_session, SessionSettings};
use crate::infrastructure::transport::WebSocketTransport;
use crate::infrastructure::accept::accept_loop;

/// Subprotocol noVNC asks for.
pub const BINARY_SUBPROTOCOL: &str = "binary";

/// Binds `addr` and serves RFB-over-WebSocket on `ws_path` until `running`
/// is cleared.
///
/// # Parameters
///
/// - `addr`        – Socket address to bind.
/// - `ws_path`     – The only HTTP path that is upgraded, e.g. `/vnc`.
/// - `framebuffer` – Image served to every client of this listener.
/// - `settings`    – Display name, read timeout, and show-IP flag.
/// - `running`     – Shared flag; the loop exits when this is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_ws_server(
    addr: SocketAddr,
    ws_path: String,
    framebuffer: Arc<Framebuffer>,
    settings: Arc<SessionSettings>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
    serve_websocket(listener, ws_path, framebuffer, settings, running).await
}

/// Accept loop over an already-bound listener.
///
/// # Errors
///
/// Returns an error only if the local address cannot be read.
pub async fn serve_websocket(
    listener: TcpListener,
    ws_path: String,
    framebuffer: Arc<Framebuffer>,
    settings: Arc<SessionSettings>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!(
        "[{}] serving {}x{} image on ws://{local}{ws_path}",
        settings.server_name,
        framebuffer.width(),
        framebuffer.height()
    );
    let ws_path: Arc<str> = ws_path.into();
    let name = settings.server_name.clone();

    accept_loop(&listener, &name, &running, |stream, peer| {
        let fb = Arc::clone(&framebuffer);
        let settings = Arc::clone(&settings);
        let path = Arc::clone(&ws_path);
        // The HTTP upgrade happens inside the task: a client that connects
        // and never sends its request must not stall the accept loop.
        tokio::spawn(async move {
            handle_connection(stream, peer, path, fb, settings).await;
        });
    })
    .await;

    info!("[{name}] listener on {local} stopped");
    Ok(())
}

/// Upgrades one connection and runs its session.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ws_path: Arc<str>,
    framebuffer: Arc<Framebuffer>,
    settings: Arc<SessionSettings>,
) {
    let name = settings.server_name.clone();

    // Bound the upgrade by the session read timeout so a client that opens
    // the socket and never sends its HTTP request is eventually dropped.
    let callback = |req: &Request, resp: Response| upgrade_response(&ws_path, req, resp);
    let ws = match timeout(settings.read_timeout, accept_hdr_async(stream, callback)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("[{name}] websocket upgrade from {peer} failed: {e}");
            return;
        }
        Err(_) => {
            info!("[{name}] websocket upgrade from {peer} timed out");
            return;
        }
    };

    run_session(WebSocketTransport::new(ws), framebuffer, settings, peer).await;
}

/// Decides the HTTP response to an upgrade request.
///
/// Rejects paths other than `ws_path` with 404 and echoes the `binary`
/// subprotocol when the client offers it.
fn upgrade_response(
    ws_path: &str,
    req: &Request,
    mut resp: Response,
) -> Result<Response, ErrorResponse> {
    if req.uri().path() != ws_path {
        let mut err = ErrorResponse::new(Some("not found".to_string()));
        *err.status_mut() = StatusCode::NOT_FOUND;
        return Err(err);
    }

    let offers_binary = req
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == BINARY_SUBPROTOCOL);
    if offers_binary {
        resp.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(BINARY_SUBPROTOCOL),
        );
    }
    Ok(resp)
}
