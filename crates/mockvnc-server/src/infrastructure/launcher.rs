//! Turns a configuration into running listeners.
//!
//! Each `[[server]]` entry loads its image once; every port of its listen
//! range shares that framebuffer.  A server whose image cannot be loaded is
//! skipped with an error so the remaining servers still start.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tracing::error;

use mockvnc_core::Framebuffer;

use crate::application::session::SessionSettings;
use crate::domain::config::{AppConfig, ConfigError, TransportKind};
use crate::infrastructure::image_loader::FramebufferLoader;
use crate::infrastructure::tcp_server::run_tcp_server;
use crate::infrastructure::ws_server::run_ws_server;

/// One listener to start.
#[derive(Debug, Clone)]
pub struct ListenerPlan {
    pub addr: SocketAddr,
    pub transport: TransportKind,
    pub ws_path: String,
    pub framebuffer: Arc<Framebuffer>,
    pub settings: Arc<SessionSettings>,
}

/// Expands every configured server into listener plans.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidListen`] if any listen address is malformed.
/// Image failures are logged and skip only the affected server.
pub fn plan_listeners(
    config: &AppConfig,
    loader: &dyn FramebufferLoader,
) -> Result<Vec<ListenerPlan>, ConfigError> {
    let mut plans = Vec::new();
    for server in &config.servers {
        let addrs = server.listen_addrs()?;
        let framebuffer = match loader.load(&server.image) {
            Ok(fb) => Arc::new(fb),
            Err(e) => {
                error!("[{}] {e}; server not started", server.server_name);
                continue;
            }
        };
        let settings = Arc::new(SessionSettings::from_server_config(server));

        plans.extend(addrs.into_iter().map(|addr| ListenerPlan {
            addr,
            transport: server.transport,
            ws_path: server.ws_path.clone(),
            framebuffer: Arc::clone(&framebuffer),
            settings: Arc::clone(&settings),
        }));
    }
    Ok(plans)
}

/// Spawns one task per plan and waits for all of them to finish.
///
/// A listener that fails to bind is logged and the others keep running; a
/// partially started configuration is still useful.
///
/// # Errors
///
/// Returns the first failure when every listener ended in error, e.g. when
/// all configured ports are already in use.  The process must not report
/// success while serving nothing.
pub async fn run_listeners(
    plans: Vec<ListenerPlan>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let total = plans.len();
    let mut tasks = JoinSet::new();
    for plan in plans {
        let running = Arc::clone(&running);
        tasks.spawn(async move {
            let addr = plan.addr;
            let name = plan.settings.server_name.clone();
            let result = match plan.transport {
                TransportKind::Tcp => {
                    run_tcp_server(addr, plan.framebuffer, plan.settings, running).await
                }
                TransportKind::Websocket => {
                    run_ws_server(addr, plan.ws_path, plan.framebuffer, plan.settings, running)
                        .await
                }
            };
            result.with_context(|| format!("[{name}] listener {addr}"))
        });
    }

    // Failed listeners finish at once, healthy ones only at shutdown, so the
    // failures are collected as they arrive rather than after the fact.
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => anyhow::Error::new(e).context("listener task panicked"),
        };
        error!("{err:#}");
        failures.push(err);
    }

    if total > 0 && failures.len() == total {
        let first = failures.swap_remove(0);
        return Err(first.context("no listener could be started"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::parse_config;
    use crate::infrastructure::image_loader::{LoadError, MockFramebufferLoader};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    const TWO_SERVERS: &str = r#"
[[server]]
listen = "127.0.0.1:5900-5902"
image = "lobby.png"
server_name = "lobby"

[[server]]
listen = ":6080"
image = "status.jpg"
server_name = "status"
transport = "websocket"
ws_path = "/ws"
show_ip = true
read_timeout_secs = 10
"#;

    #[test]
    fn test_port_range_shares_one_framebuffer() {
        // Arrange
        let cfg = parse_config(TWO_SERVERS).unwrap();
        let mut loader = MockFramebufferLoader::new();
        loader
            .expect_load()
            .times(2)
            .returning(|_| Ok(Framebuffer::solid(4, 4, (1, 2, 3))));

        // Act
        let plans = plan_listeners(&cfg, &loader).unwrap();

        // Assert
        assert_eq!(plans.len(), 4);
        assert!(Arc::ptr_eq(&plans[0].framebuffer, &plans[2].framebuffer));
        assert!(!Arc::ptr_eq(&plans[0].framebuffer, &plans[3].framebuffer));
        let ws = &plans[3];
        assert_eq!(ws.transport, TransportKind::Websocket);
        assert_eq!(ws.ws_path, "/ws");
        assert!(ws.settings.show_ip);
        assert_eq!(ws.settings.read_timeout, Duration::from_secs(10));
        assert_eq!(ws.settings.server_name, "status");
    }

    #[test]
    fn test_server_with_unloadable_image_is_skipped() {
        let cfg = parse_config(TWO_SERVERS).unwrap();
        let mut loader = MockFramebufferLoader::new();
        loader
            .expect_load()
            .withf(|p: &Path| p == Path::new("lobby.png"))
            .returning(|p| {
                Err(LoadError::Image {
                    path: PathBuf::from(p),
                    source: image::ImageError::IoError(std::io::Error::from(
                        std::io::ErrorKind::NotFound,
                    )),
                })
            });
        loader
            .expect_load()
            .withf(|p: &Path| p == Path::new("status.jpg"))
            .returning(|_| Ok(Framebuffer::solid(2, 2, (0, 0, 0))));

        let plans = plan_listeners(&cfg, &loader).unwrap();

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].addr.port(), 6080);
    }

    fn plan_for(addr: SocketAddr) -> ListenerPlan {
        ListenerPlan {
            addr,
            transport: TransportKind::Tcp,
            ws_path: "/vnc".to_string(),
            framebuffer: Arc::new(Framebuffer::solid(1, 1, (0, 0, 0))),
            settings: Arc::new(SessionSettings::default()),
        }
    }

    #[tokio::test]
    async fn test_all_listeners_failing_to_bind_is_an_error() {
        // Arrange: hold the port so the listener cannot bind it.
        let held = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = held.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_listeners(vec![plan_for(addr)], running),
        )
        .await
        .expect("a failed bind must return promptly");

        // Assert
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to bind"), "{err:#}");
    }

    #[tokio::test]
    async fn test_one_bound_listener_keeps_startup_successful() {
        let held = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let busy = held.local_addr().unwrap();
        let free: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(false, std::sync::atomic::Ordering::Relaxed);
        });
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_listeners(vec![plan_for(busy), plan_for(free)], running),
        )
        .await
        .expect("listeners must stop after the flag is cleared");

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_no_plans_is_not_an_error() {
        let running = Arc::new(AtomicBool::new(false));
        assert!(run_listeners(Vec::new(), running).await.is_ok());
    }

    #[test]
    fn test_invalid_listen_is_an_error() {
        let cfg = parse_config("[[server]]\nlisten = \"nope\"\nimage = \"a.png\"\n").unwrap();
        let loader = MockFramebufferLoader::new();

        assert!(matches!(
            plan_listeners(&cfg, &loader),
            Err(ConfigError::InvalidListen { .. })
        ));
    }
}
