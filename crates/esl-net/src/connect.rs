use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::Error;

/// Resolves `host:port` and connects with an overall deadline.
///
/// `TcpStream::connect_timeout` only accepts a single `SocketAddr`, so when
/// resolution yields more than one candidate (e.g. a host with both an IPv4
/// and IPv6 record) each is tried in turn against a shrinking remainder of
/// the deadline.
pub fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, Error> {
    let deadline = std::time::Instant::now() + timeout;
    let addrs = (host, port).to_socket_addrs()?;

    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(err) => Err(Error::Io(err)),
        None => Err(Error::ConnectTimeout(timeout)),
    }
}
