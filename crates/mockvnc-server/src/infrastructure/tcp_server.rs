//! Plain TCP listener: one session task per accepted connection.
//!
//! Each session runs in its own Tokio task, so a slow or idle viewer only
//! ever blocks itself.  The accept loop spawns and moves on immediately.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use mockvnc_core::Framebuffer;

use crate::application::session::{run_session, SessionSettings};
use crate::infrastructure::accept::accept_loop;
use crate::infrastructure::transport::TcpTransport;

/// Binds `addr` and serves RFB until `running` is cleared.
///
/// # Parameters
///
/// - `addr`        – Socket address to bind.
/// - `framebuffer` – Image served to every client of this listener.
/// - `settings`    – Display name, read timeout, and show-IP flag.
/// - `running`     – Shared flag; the loop exits when this is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, missing
/// permission, address not local).
pub async fn run_tcp_server(
    addr: SocketAddr,
    framebuffer: Arc<Framebuffer>,
    settings: Arc<SessionSettings>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind RFB listener on {addr}"))?;
    serve_tcp(listener, framebuffer, settings, running).await
}

/// Accept loop over an already-bound listener.
///
/// # Errors
///
/// Returns an error only if the local address cannot be read.
pub async fn serve_tcp(
    listener: TcpListener,
    framebuffer: Arc<Framebuffer>,
    settings: Arc<SessionSettings>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("failed to read listener address")?;
    let name = settings.server_name.clone();
    info!(
        "[{name}] serving {}x{} image on {local}",
        framebuffer.width(),
        framebuffer.height()
    );

    accept_loop(&listener, &name, &running, |stream, peer| {
        // The framebuffer and settings are shared read-only by every session;
        // cloning the `Arc` only bumps a reference count.
        let fb = Arc::clone(&framebuffer);
        let settings = Arc::clone(&settings);
        tokio::spawn(async move {
            run_session(TcpTransport::new(stream), fb, settings, peer).await;
        });
    })
    .await;

    info!("[{name}] listener on {local} stopped");
    Ok(())
}
