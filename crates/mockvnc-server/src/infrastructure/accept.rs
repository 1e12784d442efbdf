//! Accept loop shared by the TCP and WebSocket listeners.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, error};

use crate::infrastructure::{ACCEPT_ERROR_BACKOFF, ACCEPT_POLL_INTERVAL};

/// Accepts connections until `running` is cleared, handing each one to
/// `on_accept`.
///
/// # Parameters
///
/// - `listener`  – An already-bound listener.
/// - `name`      – Server display name, used as the log prefix.
/// - `running`   – Shared shutdown flag, checked at least every 200 ms.
/// - `on_accept` – Called once per accepted connection.  It must not block:
///   it is expected to `tokio::spawn` the session and return.
pub(crate) async fn accept_loop<F>(
    listener: &TcpListener,
    name: &str,
    running: &AtomicBool,
    mut on_accept: F,
) where
    F: FnMut(TcpStream, SocketAddr),
{
    while running.load(Ordering::Relaxed) {
        // `accept()` would otherwise wait forever on an idle port and the
        // shutdown flag would never be re-checked.
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                // Updates are written in one burst; don't let Nagle hold the
                // tail of a frame back.
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("[{name}] set_nodelay failed for {peer}: {e}");
                }
                on_accept(stream, peer);
            }
            Ok(Err(e)) => {
                // Usually transient (e.g. out of file descriptors).  Pause so a
                // persistent failure does not spin the loop.
                error!("[{name}] accept error: {e}");
                sleep(ACCEPT_ERROR_BACKOFF).await;
            }
            Err(_) => {
                // Poll interval elapsed with no connection; re-check the flag.
            }
        }
    }
}
