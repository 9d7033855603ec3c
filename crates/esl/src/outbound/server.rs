use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::connection::ConnectionConfig;
use crate::error::Error;
use crate::outbound::session::OutboundSession;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A per-call handler invoked once the outbound handshake completes.
///
/// Implemented for any `Fn(Arc<OutboundSession>) + Send + Sync + 'static`,
/// so a closure is usually enough; implement the trait directly for an
/// application that needs its own state.
pub trait Application: Send + Sync + 'static {
    fn run(&self, session: Arc<OutboundSession>);
}

impl<F> Application for F
where
    F: Fn(Arc<OutboundSession>) + Send + Sync + 'static,
{
    fn run(&self, session: Arc<OutboundSession>) {
        self(session);
    }
}

/// Listens for the switch dialing in, one TCP connection per call, and runs
/// an [`Application`] on its own thread for each (§4.6, §4.7).
///
/// Binds eagerly in [`start`](Self::start) (the first of `ports` to
/// successfully bind wins — see `esl_net::CandidateListener`), then runs
/// the accept loop on a background thread until [`stop`](Self::stop).
pub struct OutboundESLServer {
    local_addr: std::net::SocketAddr,
    running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl OutboundESLServer {
    /// `max_connections` caps concurrently active sessions; a connection
    /// arriving over the cap is accepted just long enough to complete the
    /// outbound handshake and then immediately stopped, rather than queued
    /// — the switch retries routing on its own.
    pub fn start<A>(host: &str, ports: &[u16], max_connections: usize, application: A) -> Result<Self, Error>
    where
        A: Application,
    {
        let listener = esl_net::CandidateListener::bind_first_available(host, ports)
            .map_err(|e| Error::InvalidArgument(format!("failed to bind outbound listener: {e}")))?;
        let local_addr = listener.local_addr();

        let running = Arc::new(AtomicBool::new(true));
        let active = Arc::new(AtomicUsize::new(0));
        let workers = Arc::new(Mutex::new(Vec::new()));
        let application: Arc<dyn Application> = Arc::new(application);

        info!(%local_addr, max_connections, "outbound server listening");

        let accept_thread = {
            let running = running.clone();
            let active = active.clone();
            let workers = workers.clone();
            thread::Builder::new()
                .name("esl-outbound-accept".into())
                .spawn(move || accept_loop(listener, running, active, max_connections, workers, application))
                .expect("failed to spawn esl outbound accept thread")
        };

        Ok(Self {
            local_addr,
            running,
            active,
            accept_thread: Mutex::new(Some(accept_thread)),
            workers,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stops accepting new connections, then joins the accept thread and
    /// every still-running session thread. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.accept_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for OutboundESLServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: esl_net::CandidateListener,
    running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    max_connections: usize,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    application: Arc<dyn Application>,
) {
    while running.load(Ordering::Acquire) {
        match listener.try_accept() {
            Ok(Some((socket, peer))) => {
                if active.load(Ordering::Acquire) >= max_connections {
                    warn!(%peer, max_connections, "rejecting outbound connection: at capacity");
                    if let Ok(session) = OutboundSession::accept(socket, ConnectionConfig::default()) {
                        session.stop();
                    }
                } else {
                    active.fetch_add(1, Ordering::AcqRel);
                    let handle = spawn_session(socket, peer, active.clone(), application.clone());
                    workers.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
                }
            }
            Ok(None) => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                warn!(error = %e, "outbound accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }

        reap_finished(&workers);
    }
}

fn spawn_session(
    socket: std::net::TcpStream,
    peer: std::net::SocketAddr,
    active: Arc<AtomicUsize>,
    application: Arc<dyn Application>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("esl-outbound-session".into())
        .spawn(move || {
            match OutboundSession::accept(socket, ConnectionConfig::default()) {
                Ok(session) => {
                    application.run(session.clone());
                    session.stop();
                }
                Err(e) => warn!(%peer, error = %e, "outbound handshake failed"),
            }
            active.fetch_sub(1, Ordering::AcqRel);
        })
        .expect("failed to spawn esl outbound session thread")
}

fn reap_finished(workers: &Mutex<Vec<JoinHandle<()>>>) {
    let mut workers = workers.lock().unwrap_or_else(|e| e.into_inner());
    let mut i = 0;
    while i < workers.len() {
        if workers[i].is_finished() {
            let handle = workers.swap_remove(i);
            let _ = handle.join();
        } else {
            i += 1;
        }
    }
}
