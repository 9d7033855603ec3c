use std::net::{SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Socket, Type};
use tracing::{debug, warn};

use crate::Error;

/// A listening socket bound to the first of a list of candidate ports.
///
/// Mirrors the outbound server's `bind_port`/`bind_address` contract: a
/// scalar port is just a one-element candidate list, and the first port that
/// successfully binds wins. `SO_REUSEADDR` is set before bind so a restarted
/// process can rebind immediately after a crash.
pub struct CandidateListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl CandidateListener {
    /// Tries each of `ports` in order against `host`, returning the first
    /// successful bind. Non-blocking is enabled on the returned listener so
    /// the caller can run a cooperative accept loop.
    pub fn bind_first_available(host: &str, ports: &[u16]) -> Result<Self, Error> {
        let mut last_err = None;

        for &port in ports {
            match bind_one(host, port) {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    debug!(%local_addr, "bound outbound listener");
                    listener.set_nonblocking(true)?;
                    return Ok(Self { listener, local_addr });
                }
                Err(err) => {
                    warn!(host, port, %err, "candidate port unavailable, trying next");
                    last_err = Some(err);
                }
            }
        }

        Err(Error::NoPortAvailable(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no candidate ports given")
        })))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-blocking accept. Returns `Ok(None)` on `WouldBlock` so the caller
    /// can yield cooperatively instead of treating it as an error.
    pub fn try_accept(&self) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => Ok(Some((stream, addr))),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn bind_one(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad bind address"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}
