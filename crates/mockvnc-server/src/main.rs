//! mockvnc: serve a static image to VNC clients.
//!
//! # Usage
//!
//! ```text
//! mockvnc [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>        TOML file with one [[server]] table per image
//!       --listen <ADDR>        host:port or host:start-end [default: :5900]
//!       --image <FILE>         PNG or JPEG to serve [default: images/default.png]
//!       --server-name <NAME>   desktop name [default: Mock VNC server]
//!       --websocket            speak RFB over WebSocket instead of raw TCP
//!       --ws-path <PATH>       WebSocket upgrade path [default: /vnc]
//!       --show-ip              stamp each client's IP onto its image
//!       --read-timeout <SECS>  idle timeout per session [default: 30]
//! ```
//!
//! With `--config` the single-server flags are ignored.  Log verbosity follows
//! `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mockvnc_server::domain::config::{
    expand_listen, load_config, AppConfig, ServerConfig, TransportKind, DEFAULT_READ_TIMEOUT_SECS,
    DEFAULT_SERVER_NAME, DEFAULT_WS_PATH,
};
use mockvnc_server::infrastructure::image_loader::ImageFileLoader;
use mockvnc_server::infrastructure::launcher::{plan_listeners, run_listeners};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Minimal VNC server that shows a static image.
#[derive(Debug, Parser)]
#[command(name = "mockvnc", about = "Serve a static image over RFB", version)]
struct Cli {
    /// Configuration file; overrides every single-server flag.
    #[arg(short, long, env = "MOCKVNC_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, `host:port` or `host:start-end`.
    #[arg(long, default_value = ":5900", env = "MOCKVNC_LISTEN")]
    listen: String,

    /// Image to serve.  Relative paths are also looked up under `images/`.
    #[arg(long, default_value = "images/default.png", env = "MOCKVNC_IMAGE")]
    image: PathBuf,

    /// Desktop name sent to clients.
    #[arg(long, default_value = DEFAULT_SERVER_NAME)]
    server_name: String,

    /// Accept noVNC-style WebSocket connections instead of raw TCP.
    #[arg(long)]
    websocket: bool,

    /// HTTP path for the WebSocket upgrade.
    #[arg(long, default_value = DEFAULT_WS_PATH)]
    ws_path: String,

    /// Draw each client's IP address onto its image.
    #[arg(long)]
    show_ip: bool,

    /// Seconds a session may stay idle before it is closed.
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT_SECS)]
    read_timeout: u64,
}

impl Cli {
    /// Builds the configuration to run, from the file or from the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is unreadable or invalid, if
    /// `--listen` cannot be parsed, or if `--read-timeout` is zero.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        if let Some(path) = self.config {
            return load_config(&path)
                .with_context(|| format!("failed to load config {}", path.display()));
        }

        expand_listen(&self.listen)?;
        let config = AppConfig {
            servers: vec![ServerConfig {
                listen: self.listen,
                image: self.image,
                server_name: self.server_name,
                transport: if self.websocket {
                    TransportKind::Websocket
                } else {
                    TransportKind::Tcp
                },
                ws_path: self.ws_path,
                show_ip: self.show_ip,
                read_timeout_secs: self.read_timeout,
            }],
        };
        config.validate()?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_app_config()?;
    let plans = plan_listeners(&config, &ImageFileLoader::default())?;
    if plans.is_empty() {
        anyhow::bail!("no server could be started");
    }
    info!(
        "mockvnc {} starting {} listener(s)",
        env!("CARGO_PKG_VERSION"),
        plans.len()
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_listeners(plans, running).await?;

    info!("mockvnc stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
