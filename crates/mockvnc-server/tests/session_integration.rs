//! End-to-end tests for RFB sessions.
//!
//! The server side always runs through the public entry points the listeners
//! use (`run_session`, `serve_tcp`, `serve_websocket`); the client side is a
//! minimal hand-written viewer that speaks the wire protocol directly.
//!
//! ```text
//! viewer                              server
//! ──────                              ──────
//!                     ◀──────────     "RFB 003.008\n"
//! "RFB 003.008\n"     ──────────▶
//!                     ◀──────────     [1, 1]
//! [1]                 ──────────▶
//!                     ◀──────────     [0, 0, 0, 0]
//! [1]                 ──────────▶
//!                     ◀──────────     ServerInit
//! SetPixelFormat?     ──────────▶
//! UpdateRequest       ──────────▶
//!                     ◀──────────     FramebufferUpdate (raw)
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use mockvnc_core::protocol::codec::{
    decode_framebuffer_update_header, decode_server_init, encode_pixel_format,
};
use mockvnc_core::{Framebuffer, PixelFormat, ServerInit};
use mockvnc_server::application::session::{run_session, SessionSettings};
use mockvnc_server::infrastructure::tcp_server::serve_tcp;
use mockvnc_server::infrastructure::transport::TcpTransport;
use mockvnc_server::infrastructure::ws_server::serve_websocket;

const PEER: &str = "192.0.2.10:51000";
const WAIT: Duration = Duration::from_secs(5);

// ── Viewer-side helpers ───────────────────────────────────────────────────────

fn settings(name: &str) -> Arc<SessionSettings> {
    Arc::new(SessionSettings {
        server_name: name.to_string(),
        ..SessionSettings::default()
    })
}

fn peer() -> SocketAddr {
    PEER.parse().unwrap()
}

async fn read_n<S: AsyncRead + Unpin>(stream: &mut S, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("server must answer in time")
        .expect("read must succeed");
    buf
}

/// Performs the viewer half of the handshake and returns the ServerInit.
async fn viewer_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> ServerInit {
    assert_eq!(read_n(stream, 12).await, b"RFB 003.008\n");
    stream.write_all(b"RFB 003.008\n").await.unwrap();
    assert_eq!(read_n(stream, 2).await, vec![1, 1]);
    stream.write_all(&[1]).await.unwrap();
    assert_eq!(read_n(stream, 4).await, vec![0, 0, 0, 0]);
    stream.write_all(&[1]).await.unwrap();

    let mut init = read_n(stream, 24).await;
    let name_len = u32::from_be_bytes([init[20], init[21], init[22], init[23]]) as usize;
    init.extend(read_n(stream, name_len).await);
    let (server_init, consumed) = decode_server_init(&init).unwrap();
    assert_eq!(consumed, init.len());
    server_init
}

fn set_pixel_format_msg(pf: &PixelFormat) -> Vec<u8> {
    let mut msg = vec![0u8, 0, 0, 0];
    encode_pixel_format(&mut msg, pf);
    msg
}

fn update_request_msg(width: u16, height: u16) -> Vec<u8> {
    let mut msg = vec![3u8, 0, 0, 0, 0, 0];
    msg.extend_from_slice(&width.to_be_bytes());
    msg.extend_from_slice(&height.to_be_bytes());
    msg
}

/// Reads one FramebufferUpdate and returns its pixel payload.
async fn read_update<S: AsyncRead + Unpin>(stream: &mut S, bytes_per_pixel: usize) -> Vec<u8> {
    let header = read_n(stream, 16).await;
    let (count, rect, consumed) = decode_framebuffer_update_header(&header).unwrap();
    assert_eq!((count, consumed), (1, 16));
    assert_eq!((rect.x, rect.y, rect.encoding), (0, 0, 0));
    let len = usize::from(rect.width) * usize::from(rect.height) * bytes_per_pixel;
    read_n(stream, len).await
}

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

// ── In-memory sessions ────────────────────────────────────────────────────────

/// The handshake advertises the image size, the default 32bpp format and the
/// configured name; an update then carries width × height × 4 bytes.
#[tokio::test]
async fn test_default_format_update_is_four_bytes_per_pixel() {
    // Arrange
    let fb = Arc::new(Framebuffer::solid(4, 3, (0x10, 0x20, 0x30)));
    let (server_io, mut client) = tokio::io::duplex(64 * 1024);

    // Act
    let server = run_session(TcpTransport::new(server_io), fb, settings("lobby"), peer());
    let viewer = async {
        let init = viewer_handshake(&mut client).await;
        client.write_all(&update_request_msg(4, 3)).await.unwrap();
        let pixels = read_update(&mut client, 4).await;
        drop(client);
        (init, pixels)
    };
    let ((), (init, pixels)) = tokio::join!(server, viewer);

    // Assert
    assert_eq!((init.width, init.height), (4, 3));
    assert_eq!(init.pixel_format, PixelFormat::rgb888());
    assert_eq!(init.name, "lobby");
    assert_eq!(pixels.len(), 4 * 3 * 4);
    assert!(pixels.chunks_exact(4).all(|p| p == [0x30, 0x20, 0x10, 0x00]));
}

#[tokio::test]
async fn test_bgr233_request_gets_one_byte_pixels() {
    let fb = Arc::new(Framebuffer::solid(5, 2, (255, 0, 0)));
    let (server_io, mut client) = tokio::io::duplex(64 * 1024);

    let server = run_session(TcpTransport::new(server_io), fb, settings("bgr"), peer());
    let viewer = async {
        viewer_handshake(&mut client).await;
        client
            .write_all(&set_pixel_format_msg(&PixelFormat::bgr233()))
            .await
            .unwrap();
        client.write_all(&update_request_msg(5, 2)).await.unwrap();
        let pixels = read_update(&mut client, 1).await;
        drop(client);
        pixels
    };
    let ((), pixels) = tokio::join!(server, viewer);

    assert_eq!(pixels, vec![0xE0; 10]);
}

/// Input and clipboard messages are consumed exactly, so a request that
/// follows them in the same burst is still understood.
#[tokio::test]
async fn test_input_and_clipboard_messages_are_consumed() {
    let fb = Arc::new(Framebuffer::solid(2, 2, (1, 2, 3)));
    let (server_io, mut client) = tokio::io::duplex(64 * 1024);

    let server = run_session(TcpTransport::new(server_io), fb, settings("input"), peer());
    let viewer = async {
        viewer_handshake(&mut client).await;
        let mut burst = Vec::new();
        burst.extend_from_slice(&[4, 1, 0, 0, 0, 0, 0, 0x61]); // KeyEvent
        burst.extend_from_slice(&[5, 0, 0, 10, 0, 20]); // PointerEvent
        burst.extend_from_slice(&[6, 0, 0, 0, 0, 0, 0, 5]); // ClientCutText
        burst.extend_from_slice(b"hello");
        burst.extend_from_slice(&[2, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 1]); // SetEncodings
        burst.extend_from_slice(&[150, 1, 0, 0, 0, 0, 0, 2, 0, 2]); // EnableContinuousUpdates
        burst.extend_from_slice(&update_request_msg(2, 2));
        client.write_all(&burst).await.unwrap();
        let pixels = read_update(&mut client, 4).await;
        drop(client);
        pixels
    };
    let ((), pixels) = tokio::join!(server, viewer);

    assert_eq!(pixels.len(), 16);
}

/// An unknown message type costs only the bytes already sent with it; a
/// request sent afterwards is still answered with the full frame.
#[tokio::test]
async fn test_unknown_message_type_is_skipped_and_session_continues() {
    let fb = Arc::new(Framebuffer::solid(3, 2, (7, 8, 9)));
    let (server_io, mut client) = tokio::io::duplex(64 * 1024);

    let server = run_session(TcpTransport::new(server_io), fb, settings("unknown"), peer());
    let viewer = async {
        viewer_handshake(&mut client).await;
        client.write_all(&[200, 1, 2, 3]).await.unwrap();
        // Let the server drain the unknown message before the next one lands.
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.write_all(&update_request_msg(3, 2)).await.unwrap();
        let pixels = read_update(&mut client, 4).await;
        drop(client);
        pixels
    };
    let ((), pixels) = tokio::join!(server, viewer);

    assert_eq!(pixels.len(), 3 * 2 * 4);
    assert!(pixels.chunks_exact(4).all(|p| p == [9, 8, 7, 0]));
}

/// An unsupported format is ignored: updates keep the previous format, and
/// repeating the same request does not repeat the warning.
#[tokio::test(flavor = "current_thread")]
async fn test_rejected_format_keeps_default_and_warns_once() {
    // Arrange
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let palette = PixelFormat {
        true_color_flag: 0,
        ..PixelFormat::bgr233()
    };
    let fb = Arc::new(Framebuffer::solid(3, 3, (9, 9, 9)));
    let (server_io, mut client) = tokio::io::duplex(64 * 1024);

    // Act
    let server = run_session(TcpTransport::new(server_io), fb, settings("warn"), peer());
    let viewer = async {
        viewer_handshake(&mut client).await;
        client.write_all(&set_pixel_format_msg(&palette)).await.unwrap();
        client.write_all(&set_pixel_format_msg(&palette)).await.unwrap();
        client.write_all(&update_request_msg(3, 3)).await.unwrap();
        let pixels = read_update(&mut client, 4).await;
        drop(client);
        pixels
    };
    let ((), pixels) = tokio::join!(server, viewer);

    // Assert
    assert_eq!(pixels.len(), 3 * 3 * 4);
    let text = log.text();
    assert_eq!(text.matches("unsupported pixel format").count(), 1, "{text}");
    assert!(text.contains("8bpp trueColor=0"), "{text}");
    assert!(
        text.lines()
            .filter(|l| l.contains("[warn]"))
            .all(|l| l.contains(PEER) && l.contains("session=")),
        "{text}"
    );
}

#[tokio::test]
async fn test_idle_client_is_disconnected_after_read_timeout() {
    let fb = Arc::new(Framebuffer::solid(1, 1, (0, 0, 0)));
    let settings = Arc::new(SessionSettings {
        read_timeout: Duration::from_millis(100),
        ..SessionSettings::default()
    });
    let (server_io, mut client) = tokio::io::duplex(1024);

    let server = run_session(TcpTransport::new(server_io), fb, settings, peer());
    let viewer = async {
        viewer_handshake(&mut client).await;
        // Send nothing; the server must hang up on its own.
        let mut rest = Vec::new();
        timeout(WAIT, client.read_to_end(&mut rest))
            .await
            .expect("server must close the idle session")
            .unwrap();
        rest
    };
    let ((), rest) = tokio::join!(server, viewer);

    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_show_ip_changes_top_left_pixels() {
    let fb = Arc::new(Framebuffer::solid(64, 24, (0, 255, 0)));
    let settings = Arc::new(SessionSettings {
        show_ip: true,
        ..SessionSettings::default()
    });
    let (server_io, mut client) = tokio::io::duplex(64 * 1024);

    let server = run_session(TcpTransport::new(server_io), fb, settings, peer());
    let viewer = async {
        viewer_handshake(&mut client).await;
        client.write_all(&update_request_msg(64, 24)).await.unwrap();
        let pixels = read_update(&mut client, 4).await;
        drop(client);
        pixels
    };
    let ((), pixels) = tokio::join!(server, viewer);

    // The banner background is black; the far corner keeps the image colour.
    assert_eq!(&pixels[..4], &[0, 0, 0, 0]);
    assert_eq!(&pixels[pixels.len() - 4..], &[0, 255, 0, 0]);
}

// ── Real sockets ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tcp_listener_serves_frame_and_stops_on_flag() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    let fb = Arc::new(Framebuffer::solid(8, 6, (0, 0, 255)));
    let server = tokio::spawn(serve_tcp(
        listener,
        fb,
        settings("tcp"),
        Arc::clone(&running),
    ));

    // Act
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let init = viewer_handshake(&mut stream).await;
    stream.write_all(&update_request_msg(8, 6)).await.unwrap();
    let pixels = read_update(&mut stream, 4).await;

    // Assert
    assert_eq!((init.width, init.height), (8, 6));
    assert!(pixels.chunks_exact(4).all(|p| p == [255, 0, 0, 0]));

    running.store(false, Ordering::Relaxed);
    timeout(WAIT, server)
        .await
        .expect("accept loop must notice the flag")
        .unwrap()
        .unwrap();
}

async fn start_ws_server(fb: Framebuffer) -> (SocketAddr, Arc<AtomicBool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve_websocket(
        listener,
        "/vnc".to_string(),
        Arc::new(fb),
        settings("ws"),
        Arc::clone(&running),
    ));
    (addr, running)
}

async fn next_binary<S>(ws: &mut S) -> Vec<u8>
where
    S: futures_util::Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("server must answer in time")
            .expect("stream must stay open")
            .expect("frame must be valid");
        if let WsMessage::Binary(data) = msg {
            return data;
        }
    }
}

#[tokio::test]
async fn test_websocket_session_with_coalesced_messages() {
    // Arrange
    let (addr, running) = start_ws_server(Framebuffer::solid(6, 4, (255, 0, 0))).await;
    let mut request = format!("ws://{addr}/vnc").into_client_request().unwrap();
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, "binary".parse().unwrap());

    // Act
    let (mut ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(next_binary(&mut ws).await, b"RFB 003.008\n");
    ws.send(WsMessage::Binary(b"RFB 003.008\n".to_vec()))
        .await
        .unwrap();
    assert_eq!(next_binary(&mut ws).await, vec![1, 1]);
    ws.send(WsMessage::Binary(vec![1])).await.unwrap();
    assert_eq!(next_binary(&mut ws).await, vec![0, 0, 0, 0]);
    ws.send(WsMessage::Binary(vec![1])).await.unwrap();
    let (init, _) = decode_server_init(&next_binary(&mut ws).await).unwrap();

    let mut burst = set_pixel_format_msg(&PixelFormat::bgr233());
    burst.extend_from_slice(&[2, 0, 0, 1, 0, 0, 0, 0]);
    burst.extend_from_slice(&update_request_msg(6, 4));
    ws.send(WsMessage::Binary(burst)).await.unwrap();
    let frame = next_binary(&mut ws).await;

    // Assert
    assert_eq!(
        response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
        "binary"
    );
    assert_eq!((init.width, init.height), (6, 4));
    assert_eq!(frame.len(), 16 + 6 * 4);
    assert!(frame[16..].iter().all(|&b| b == 0xE0));

    running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_websocket_handshake_reply_of_wrong_size_closes_session() {
    let (addr, running) = start_ws_server(Framebuffer::solid(2, 2, (0, 0, 0))).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/vnc"))
        .await
        .unwrap();

    assert_eq!(next_binary(&mut ws).await, b"RFB 003.008\n");
    ws.send(WsMessage::Binary(b"RFB 003.008\n\n".to_vec()))
        .await
        .unwrap();

    // Nothing else may arrive except the closing of the connection.
    loop {
        match timeout(WAIT, ws.next())
            .await
            .expect("server must close the session")
        {
            Some(Ok(WsMessage::Binary(data))) => panic!("unexpected data after violation: {data:?}"),
            Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }

    running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_websocket_upgrade_on_other_path_is_404() {
    let (addr, running) = start_ws_server(Framebuffer::solid(2, 2, (0, 0, 0))).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/elsewhere"))
        .await
        .unwrap_err();

    match err {
        WsError::Http(resp) => assert_eq!(resp.status(), 404),
        other => panic!("expected HTTP error, got {other:?}"),
    }
    running.store(false, Ordering::Relaxed);
}
