//! TOML configuration schema for one or more served images.
//!
//! ```toml
//! [[server]]
//! listen = "0.0.0.0:5900-5903"
//! image = "images/default.png"
//! server_name = "Lobby display"
//!
//! [[server]]
//! listen = ":6080"
//! image = "status.jpg"
//! transport = "websocket"
//! ws_path = "/vnc"
//! show_ip = true
//! ```
//!
//! Every field except `listen` and `image` has a default, so a config file
//! only needs to state what differs.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A `listen` value is not `host:port` or `host:start-end`.
    #[error("invalid listen address '{listen}': {reason}")]
    InvalidListen { listen: String, reason: String },

    /// The file parsed but declares no servers.
    #[error("configuration declares no [[server]] entries")]
    NoServers,

    /// A zero read timeout would close every session on its first read.
    #[error("read timeout for server '{server}' must be at least 1 second")]
    InvalidReadTimeout { server: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    /// Checks the values serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoServers`] for an empty server list and
    /// [`ConfigError::InvalidReadTimeout`] for a zero read timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        for server in &self.servers {
            if server.read_timeout_secs == 0 {
                return Err(ConfigError::InvalidReadTimeout {
                    server: server.server_name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Which framing the listener speaks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// RFB directly on the TCP stream.
    #[default]
    Tcp,
    /// RFB inside binary WebSocket messages.
    Websocket,
}

/// One served image and where to serve it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// `host:port` or `host:start-end`.  An empty host binds all interfaces.
    pub listen: String,
    /// PNG or JPEG file to serve.
    pub image: PathBuf,
    /// Desktop name sent in ServerInit.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// HTTP path accepted for the WebSocket upgrade.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Stamp each client's IP address onto its copy of the image.
    #[serde(default)]
    pub show_ip: bool,
    /// Idle time after which a session is closed.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Expands [`listen`](Self::listen) into one socket address per port.
    ///
    /// # Errors
    ///
    /// See [`expand_listen`].
    pub fn listen_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        expand_listen(&self.listen)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

pub const DEFAULT_SERVER_NAME: &str = "Mock VNC server";
pub const DEFAULT_WS_PATH: &str = "/vnc";
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}
fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}
fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the configuration file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read,
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::NoServers`] if no `[[server]]` table is present.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parses configuration TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML, or any error from
/// [`AppConfig::validate`].
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Expands `host:port` or `host:start-end` into socket addresses.
///
/// An empty host means all IPv4 interfaces; IPv6 hosts are written in
/// brackets (`[::1]:5900`).  A hostname is resolved once, and its first
/// address is used for every port of the range.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidListen`] for a missing port, a host that
/// does not resolve, a bracketed host that is not an IP address, an
/// unparsable port, or a range whose end precedes its start.
pub fn expand_listen(listen: &str) -> Result<Vec<SocketAddr>, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidListen {
        listen: listen.to_string(),
        reason: reason.to_string(),
    };

    let (host, ports) = listen
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing ':port'"))?;

    let parse_port = |s: &str| s.trim().parse::<u16>().map_err(|_| invalid("bad port number"));
    let (start, end) = match ports.split_once('-') {
        Some((a, b)) => (parse_port(a)?, parse_port(b)?),
        None => {
            let p = parse_port(ports)?;
            (p, p)
        }
    };
    if end < start {
        return Err(invalid("port range end is below its start"));
    }

    let ip: IpAddr = if host.is_empty() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else if let Some(inner) = host.strip_prefix('[') {
        inner
            .strip_suffix(']')
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| invalid("bracketed host is not an IP address"))?
    } else if let Ok(ip) = host.parse() {
        ip
    } else {
        // Blocking lookup; only runs once at startup.
        (host, start)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|addr| addr.ip())
            .ok_or_else(|| invalid("cannot resolve host"))?
    };

    Ok((start..=end).map(|port| SocketAddr::new(ip, port)).collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
