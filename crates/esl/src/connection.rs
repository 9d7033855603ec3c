use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::correlator::Correlator;
use crate::dispatcher::{Dispatcher, Hook};
use crate::error::Error;
use crate::event::{Body, Event};
use crate::frame::FrameReader;
use crate::header::{parse_header_block, HeaderMap};
use crate::registry::{Handler, HandlerRegistry};

/// Optional interceptors run around every dispatched event.
#[derive(Clone, Default)]
pub struct ConnectionConfig {
    pub before_handle: Option<Hook>,
    pub after_handle: Option<Hook>,
}

/// Content-Type values the reader thread classifies on every frame (§4.2).
mod content_type {
    pub const AUTH_REQUEST: &str = "auth/request";
    pub const COMMAND_REPLY: &str = "command/reply";
    pub const API_RESPONSE: &str = "api/response";
    pub const DISCONNECT_NOTICE: &str = "text/disconnect-notice";
    pub const RUDE_REJECTION: &str = "text/rude-rejection";
    pub const EVENT_PLAIN: &str = "text/event-plain";
    pub const LOG_DATA: &str = "log/data";
}

/// The protocol engine shared by `InboundESL` and `OutboundSession`: one
/// reader thread turning socket bytes into classified frames, one dispatcher
/// thread fanning events out to registered handlers, and a correlator
/// pairing commands to their replies.
///
/// Reading happens on blocking `std::net::TcpStream`, one reader thread per
/// connection, rather than the single-reactor-many-connections model a
/// multiplexed transport would use: a caller blocked in `Correlator::send`
/// needs a dedicated thread still pulling frames off the same socket, which
/// a cooperative single-thread reactor can't give it without additional
/// plumbing. A single connection's one extra thread is cheap; the transport
/// has no multiplexing to lose.
pub struct Connection {
    socket: TcpStream,
    correlator: Arc<Correlator>,
    registry: Arc<HandlerRegistry>,
    running: Arc<AtomicBool>,
    auth_gate: Arc<(Mutex<Option<HeaderMap>>, std::sync::Condvar)>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    dispatcher_thread: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Connection {
    /// Takes ownership of an already-connected socket and starts the reader
    /// and dispatcher threads. The caller is responsible for any connect
    /// timeout; from here on reads block indefinitely (frames arrive or the
    /// socket closes).
    pub fn start(socket: TcpStream, config: ConnectionConfig) -> Result<Arc<Self>, Error> {
        socket.set_nodelay(true).ok();

        // Unbuffered: every command must hit the wire as soon as it's
        // written, not sit around waiting for a buffer to fill.
        let writer = socket.try_clone().map_err(|_| Error::NotConnected)?;
        let correlator = Arc::new(Correlator::new(Box::new(writer)));
        let registry = Arc::new(HandlerRegistry::new());
        let running = Arc::new(AtomicBool::new(true));
        let auth_gate = Arc::new((Mutex::new(None), std::sync::Condvar::new()));

        let (dispatcher, dispatcher_thread) = Dispatcher::spawn(
            registry.clone(),
            config.before_handle,
            config.after_handle,
            running.clone(),
        );

        let reader_socket = socket.try_clone().map_err(|_| Error::NotConnected)?;
        let reader_thread = spawn_reader(
            reader_socket,
            correlator.clone(),
            registry.clone(),
            dispatcher.clone(),
            auth_gate.clone(),
            running.clone(),
        );

        Ok(Arc::new(Self {
            socket,
            correlator,
            registry,
            running,
            auth_gate,
            reader_thread: Mutex::new(Some(reader_thread)),
            dispatcher_thread: Mutex::new(Some(dispatcher_thread)),
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.correlator.is_connected() && !self.stopped.load(Ordering::Acquire)
    }

    pub fn send(&self, text: &str) -> Result<Event, Error> {
        self.correlator.send(text)
    }

    pub fn send_timeout(&self, text: &str, timeout: Duration) -> Result<Event, Error> {
        self.correlator.send_timeout(text, timeout)
    }

    pub fn register_handle(&self, key: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry.register(key, handler);
    }

    pub fn unregister_handle(&self, key: &str, handler: &Arc<dyn Handler>) -> Result<(), Error> {
        self.registry.unregister(key, handler)
    }

    /// Blocks until the reader thread observes `auth/request` or
    /// `text/rude-rejection`, returning the headers of whichever arrived
    /// first. Used by `InboundESL::connect` to know when it may send `auth`.
    pub fn wait_for_auth_gate(&self, timeout: Duration) -> Option<HeaderMap> {
        let (lock, condvar) = &*self.auth_gate;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |headers| headers.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Best-effort `exit`, then joins both threads and closes the socket.
    /// Idempotent: a second call is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);

        if self.correlator.is_connected() {
            match self.correlator.send_timeout("exit", Duration::from_millis(500)) {
                Ok(_) | Err(Error::NotConnected) | Err(Error::SessionGone) => {}
                Err(e) => debug!(error = %e, "exit command did not complete cleanly"),
            }
        }
        self.correlator.disconnect(Error::NotConnected);

        self.socket.shutdown(std::net::Shutdown::Both).ok();

        if let Some(handle) = self.reader_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.dispatcher_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

type AuthGate = Arc<(Mutex<Option<HeaderMap>>, std::sync::Condvar)>;

fn spawn_reader(
    socket: TcpStream,
    correlator: Arc<Correlator>,
    registry: Arc<HandlerRegistry>,
    dispatch: Dispatcher,
    auth_gate: AuthGate,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("esl-reader".into())
        .spawn(move || reader_loop(socket, correlator, registry, dispatch, auth_gate, running))
        .expect("failed to spawn esl reader thread")
}

fn reader_loop(
    socket: TcpStream,
    correlator: Arc<Correlator>,
    registry: Arc<HandlerRegistry>,
    dispatch: Dispatcher,
    auth_gate: AuthGate,
    running: Arc<AtomicBool>,
) {
    let mut frames = FrameReader::new(socket);
    let mut saw_disconnect_notice = false;

    loop {
        let block = match frames.read_header_block() {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!("peer closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "frame read failed, closing connection");
                break;
            }
        };

        let headers = parse_header_block(&block);
        let content_type = headers.content_type().unwrap_or_default().to_string();

        let body = match headers.content_length() {
            Some(len) => match frames.read_body_exact(len) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "body read failed, closing connection");
                    break;
                }
            },
            None => None,
        };

        let event = classify_and_build(headers, body, &content_type);

        match content_type.as_str() {
            content_type::AUTH_REQUEST | content_type::RUDE_REJECTION => {
                let (lock, condvar) = &*auth_gate;
                *lock.lock().unwrap_or_else(|e| e.into_inner()) = Some(event.headers.clone());
                condvar.notify_all();
                if content_type == content_type::RUDE_REJECTION {
                    correlator.disconnect(Error::NotConnected);
                    break;
                }
            }
            content_type::COMMAND_REPLY | content_type::API_RESPONSE => {
                correlator.complete_head(event.clone());
            }
            _ => {}
        }

        if content_type == content_type::DISCONNECT_NOTICE {
            saw_disconnect_notice = true;
            // `Content-Disposition: linger` keeps the socket open so the
            // caller can still read the call's final events; only a
            // non-linger notice actually ends the connection (§4.2).
            if event.header("Content-Disposition") == Some("linger") {
                dispatch.push(event);
                continue;
            }
            dispatch.push(event);
            correlator.disconnect(Error::SessionGone);
            break;
        }

        dispatch.push(event);

        if !running.load(Ordering::Acquire) {
            break;
        }
    }

    correlator.disconnect(Error::NotConnected);

    // A dropped socket or read error never sends a disconnect-notice frame
    // of its own; synthesize one so DISCONNECT handlers still fire.
    if !saw_disconnect_notice && registry.has_any(crate::registry::DISCONNECT) {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", content_type::DISCONNECT_NOTICE);
        headers.insert("Reply-Text", "synthetic disconnect: connection lost");
        dispatch.push(Event::new(headers));
    }
}

/// Builds the final [`Event`] for a frame: a body whose Content-Type is
/// itself a header block (an event-in-event) gets parsed and merged into
/// the outer headers, per §4.2; anything else becomes a `Body::Text` or
/// `Body::Bytes` payload depending on whether it looks like log text or
/// opaque `api/response` bytes.
fn classify_and_build(mut headers: HeaderMap, body: Option<Vec<u8>>, content_type: &str) -> Event {
    let Some(bytes) = body else {
        return Event::new(headers);
    };

    if content_type.starts_with(content_type::EVENT_PLAIN) {
        let text = String::from_utf8_lossy(&bytes);
        let inner = parse_header_block(&text);
        headers.merge_from(inner);
        return Event::new(headers);
    }

    if content_type == content_type::LOG_DATA {
        return Event::with_body(headers, Body::Text(String::from_utf8_lossy(&bytes).into_owned()));
    }

    Event::with_body(headers, Body::Bytes(bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::registry::{FnHandler, DISCONNECT};

    /// `Content-Disposition: linger` keeps the connection alive and the
    /// reader running; only a non-linger notice tears it down (§4.2,
    /// scenario 6).
    #[test]
    fn disconnect_notice_with_linger_keeps_connection_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream;
            writer
                .write_all(
                    b"Content-Type: text/disconnect-notice\nContent-Disposition: linger\n\n",
                )
                .unwrap();
            // Socket stays open past the notice; the test tears it down.
            thread::sleep(Duration::from_millis(300));
        });

        let socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let connection = Connection::start(socket, ConnectionConfig::default()).unwrap();
        connection.register_handle(
            DISCONNECT,
            Arc::new(FnHandler::new("d", move |_: &Event| {
                h.fetch_add(1, Ordering::SeqCst);
            })),
        );

        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(connection.is_connected());

        connection.stop();
    }

    /// A disconnect notice with no `Content-Disposition: linger` tears the
    /// connection down as before.
    #[test]
    fn disconnect_notice_without_linger_ends_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream;
            writer.write_all(b"Content-Type: text/disconnect-notice\n\n").unwrap();
        });

        let socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let connection = Connection::start(socket, ConnectionConfig::default()).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(!connection.is_connected());

        connection.stop();
    }
}
