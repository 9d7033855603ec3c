use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::connection::{Connection, ConnectionConfig};
use crate::error::Error;
use crate::event::Event;
use crate::registry::Handler;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound-mode ESL client: dials a switch, authenticates, and issues
/// FIFO-correlated commands (§3, §4.1, §4.3).
///
/// Not `Clone`/`Sync`-shared by value — wrap in `Arc` if multiple threads
/// need to issue commands concurrently; `send` itself is already safe to
/// call from several threads at once (the correlator serializes writes).
pub struct InboundESL {
    host: String,
    port: u16,
    password: String,
    connect_timeout: Duration,
    config: ConnectionConfig,
    connection: Option<Arc<Connection>>,
}

impl InboundESL {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            config: ConnectionConfig::default(),
            connection: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens the TCP connection, waits for `auth/request`, and authenticates.
    /// Returns `Error::InvalidArgument` if the switch rejects the password or
    /// sends `text/rude-rejection` instead of a request (an ACL bounce); the
    /// connection is torn down in either case so a caller can't mistake a
    /// failed handshake for a usable client.
    pub fn connect(&mut self) -> Result<(), Error> {
        let socket = self.dial()?;
        let connection = Connection::start(socket, self.config.clone())?;

        let Some(gate) = connection.wait_for_auth_gate(self.connect_timeout) else {
            connection.stop();
            return Err(Error::InvalidArgument("timed out waiting for auth/request".into()));
        };

        if gate.content_type() == Some("text/rude-rejection") {
            connection.stop();
            return Err(Error::InvalidArgument("connection rejected before authentication".into()));
        }

        let reply = connection.send_timeout(&format!("auth {}", self.password), DEFAULT_AUTH_TIMEOUT)?;
        if reply.reply_text() != Some("+OK accepted") {
            warn!(reply = ?reply.reply_text(), "authentication rejected");
            connection.stop();
            return Err(Error::InvalidArgument("authentication rejected".into()));
        }

        info!(host = %self.host, port = self.port, "inbound connection authenticated");
        self.connection = Some(connection);
        Ok(())
    }

    fn dial(&self) -> Result<TcpStream, Error> {
        esl_net::connect_with_timeout(&self.host, self.port, self.connect_timeout)
            .map_err(Error::from)
    }

    /// Sends `text` and blocks for its correlated reply.
    pub fn send(&self, text: &str) -> Result<Event, Error> {
        self.connection().ok_or(Error::NotConnected)?.send(text)
    }

    /// Convenience wrapper issuing `api <command>` and returning the
    /// response body as text.
    pub fn api(&self, command: &str) -> Result<Event, Error> {
        self.send(&format!("api {command}"))
    }

    /// Subscribes to `events`, space-joined plain-text event names (e.g.
    /// `"CHANNEL_CREATE CHANNEL_HANGUP"`); pass `"ALL"` for everything.
    pub fn subscribe(&self, events: &str) -> Result<Event, Error> {
        self.send(&format!("event plain {events}"))
    }

    pub fn register_handle(&self, key: impl Into<String>, handler: Arc<dyn Handler>) -> Result<(), Error> {
        self.connection().ok_or(Error::NotConnected)?.register_handle(key, handler);
        Ok(())
    }

    pub fn unregister_handle(&self, key: &str, handler: &Arc<dyn Handler>) -> Result<(), Error> {
        self.connection().ok_or(Error::NotConnected)?.unregister_handle(key, handler)
    }

    pub fn connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_connected())
    }

    /// Sends `exit`, joins the reader/dispatcher threads, and closes the
    /// socket. Idempotent.
    pub fn stop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.stop();
        }
    }

    fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }
}

impl Drop for InboundESL {
    fn drop(&mut self) {
        self.stop();
    }
}
