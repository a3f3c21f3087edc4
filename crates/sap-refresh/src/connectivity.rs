//! TCP reachability probe run before any automation handle is acquired.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{RefreshError, Result};
use crate::retry::RetryPolicy;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Fail with [`RefreshError::Connectivity`] unless a TCP handshake with
/// `host:port` completes within `timeout`, trying as often as `policy` allows.
pub fn ensure_reachable(
    host: &str,
    port: u16,
    timeout: Duration,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut attempts = 0;
    policy
        .retry(&format!("connect to {host}:{port}"), |attempt| {
            attempts = attempt;
            probe(host, port, timeout)
        })
        .map_err(|source| RefreshError::Connectivity {
            host: host.to_string(),
            port,
            attempts,
            source,
        })?;
    tracing::info!("The server {host}:{port} is reachable");
    Ok(())
}

fn probe(host: &str, port: u16, timeout: Duration) -> io::Result<()> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} did not resolve"))
    }))
}
