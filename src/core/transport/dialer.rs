// src/core/transport/dialer.rs

//! Opening byte streams to ensemble members, and choosing which member to dial.

use super::stream::TransportStream;
use crate::core::KeeperError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::debug;

/// The port used for address entries that do not name one.
pub const DEFAULT_PORT: u16 = 2181;

/// Opens a connection to one ensemble member.
#[derive(Clone)]
pub enum Dialer {
    /// Plain TCP bounded by `timeout`.
    Plain { timeout: Duration },
    /// TCP followed by a TLS handshake verified against `server_name`, whatever
    /// member is actually dialed.
    Tls {
        timeout: Duration,
        connector: TlsConnector,
        server_name: ServerName<'static>,
    },
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialer::Plain { timeout } => f.debug_struct("Plain").field("timeout", timeout).finish(),
            Dialer::Tls {
                timeout,
                server_name,
                ..
            } => f
                .debug_struct("Tls")
                .field("timeout", timeout)
                .field("server_name", server_name)
                .finish(),
        }
    }
}

impl Dialer {
    pub fn plain(timeout: Duration) -> Self {
        Dialer::Plain { timeout }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Dialer::Tls { .. })
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Dialer::Plain { timeout } | Dialer::Tls { timeout, .. } => *timeout,
        }
    }

    /// Connects to `addr` (`host:port`). The TCP connect and the TLS handshake
    /// are each bounded by the dialer's timeout.
    pub async fn dial(&self, addr: &str) -> Result<TransportStream, KeeperError> {
        let timeout = self.timeout();
        let tcp_stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| KeeperError::DialTimeout(timeout))?
            .map_err(|e| KeeperError::Dial(format!("Failed to connect to {addr}: {e}")))?;
        tcp_stream.set_nodelay(true)?;

        match self {
            Dialer::Plain { .. } => {
                debug!("Opened plain TCP connection to {}", addr);
                Ok(TransportStream::Tcp(tcp_stream))
            }
            Dialer::Tls {
                connector,
                server_name,
                ..
            } => {
                let tls_stream = tokio::time::timeout(
                    timeout,
                    connector.connect(server_name.clone(), tcp_stream),
                )
                .await
                .map_err(|_| KeeperError::DialTimeout(timeout))?
                .map_err(|e| handshake_error(addr, e))?;
                debug!("Opened TLS connection to {} as {:?}", addr, server_name);
                Ok(TransportStream::Tls(Box::new(tls_stream)))
            }
        }
    }
}

/// A handshake the peer rejected (bad certificate, wrong name, protocol alert)
/// stays a TLS fault. Anything else is the network failing mid-handshake and is
/// retried like any other dial failure.
fn handshake_error(addr: &str, e: std::io::Error) -> KeeperError {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        Some(tls) => KeeperError::Tls(format!("TLS handshake with {addr} failed: {tls}")),
        None => KeeperError::Dial(format!("TLS handshake with {addr} interrupted: {e}")),
    }
}

/// Picks the ensemble member for the next connection attempt.
pub trait HostProvider: Send + Sync {
    /// The member to dial next.
    fn next(&self) -> Option<String>;

    /// Number of members known to the provider.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Simple rotation over the configured members.
#[derive(Debug)]
pub struct RoundRobinHosts {
    servers: Vec<String>,
    cursor: AtomicUsize,
}

impl RoundRobinHosts {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl HostProvider for RoundRobinHosts {
    fn next(&self) -> Option<String> {
        if self.servers.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        Some(self.servers[i].clone())
    }

    fn len(&self) -> usize {
        self.servers.len()
    }
}

/// Splits an ensemble address (`host:port[,host:port...]`) into its members,
/// appending the default port where an entry has none.
pub fn parse_servers(address: &str) -> Result<Vec<String>, KeeperError> {
    let servers: Vec<String> = address
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if has_port(s) {
                s.to_string()
            } else {
                format!("{s}:{DEFAULT_PORT}")
            }
        })
        .collect();
    if servers.is_empty() {
        return Err(KeeperError::Config(format!(
            "ensemble address '{address}' names no servers"
        )));
    }
    Ok(servers)
}

/// The host part of a single `host:port` entry.
pub fn server_host(server: &str) -> &str {
    if let Some(rest) = server.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    server.split(':').next().unwrap_or(server)
}

fn has_port(entry: &str) -> bool {
    if let Some(rest) = entry.strip_prefix('[') {
        return rest.contains("]:");
    }
    entry.contains(':')
}
