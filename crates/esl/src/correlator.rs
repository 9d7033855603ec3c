use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use tracing::trace;

use crate::error::Error;
use crate::event::Event;

type WaiterOutcome = Result<Event, Error>;

/// FIFO pairing of outgoing commands to the `command/reply`/`api/response`
/// frames that answer them.
///
/// `send` enqueues a waiter and writes the command atomically (under the
/// same lock that serializes all writers), then blocks on a one-shot
/// channel. The reader/dispatcher thread pops the head waiter for every
/// reply frame and completes it — see §4.3.
pub struct Correlator {
    writer: Mutex<Box<dyn Write + Send>>,
    pending: Mutex<VecDeque<Sender<WaiterOutcome>>>,
    connected: AtomicBool,
}

impl Correlator {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            pending: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Writes `text + "\n\n"` and blocks for the matching reply.
    ///
    /// The waiter is enqueued and the bytes are written while holding both
    /// the pending-queue lock and the writer lock, so that two callers can
    /// never interleave their command bytes or get queued out of the order
    /// their writes actually landed on the wire.
    pub fn send(&self, text: &str) -> Result<Event, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let (tx, rx) = mpsc::channel();
        {
            let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

            // Re-check under the lock: a disconnect observed between the
            // check above and taking the lock must still fail the caller
            // rather than enqueue a waiter nothing will ever complete.
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }

            pending.push_back(tx);
            writer
                .write_all(text.as_bytes())
                .and_then(|()| writer.write_all(b"\n\n"))
                .map_err(|_| Error::NotConnected)?;
            trace!(command = text, "sent command");
        }

        rx.recv().unwrap_or(Err(Error::NotConnected))
    }

    /// Same contract as [`send`](Self::send), but gives up after `timeout`
    /// rather than blocking forever. Used by the outbound session's
    /// blocking command methods.
    pub fn send_timeout(&self, text: &str, timeout: Duration) -> Result<Event, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let (tx, rx) = mpsc::channel();
        {
            let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }
            pending.push_back(tx);
            writer
                .write_all(text.as_bytes())
                .and_then(|()| writer.write_all(b"\n\n"))
                .map_err(|_| Error::NotConnected)?;
        }

        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::NotConnected),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::NotConnected),
        }
    }

    /// Completes the head-of-queue waiter with a successful reply.
    pub fn complete_head(&self, event: Event) {
        if let Some(tx) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            let _ = tx.send(Ok(event));
        }
    }

    /// Marks the correlator disconnected and fails every waiter still
    /// enqueued, so nothing blocks forever on a dead connection.
    pub fn disconnect(&self, failure: Error) {
        self.connected.store(false, Ordering::Release);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(tx) = pending.pop_front() {
            let _ = tx.send(Err(failure.clone()));
        }
    }
}
