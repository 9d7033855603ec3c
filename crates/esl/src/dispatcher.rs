use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, trace};

use crate::event::Event;
use crate::registry::{HandlerRegistry, DISCONNECT, LOG, WILDCARD};

/// A `before_handle`/`after_handle` interceptor, or any other event
/// observer wired in at connection configuration time.
pub type Hook = Arc<dyn Fn(&Event) + Send + Sync>;

/// How many events may be queued before `push` blocks the reader thread.
const QUEUE_CAPACITY: usize = 1024;
/// How often the dispatcher thread wakes up with nothing to do, purely so
/// it can notice the run flag went false.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bounded multi-producer/single-consumer queue feeding the dispatcher
/// thread. Cloning shares the same underlying channel, so the reader
/// thread can hold its own handle independent of the `Dispatcher` value
/// returned to the connection.
#[derive(Clone)]
pub struct Dispatcher {
    tx: SyncSender<Event>,
}

impl Dispatcher {
    /// Spawns the dispatcher thread. `running` is checked whenever the
    /// queue sits idle past `IDLE_POLL_INTERVAL`, so `stop()` elsewhere can
    /// tell this thread to exit without it blocking forever on an empty
    /// queue.
    pub fn spawn(
        registry: Arc<HandlerRegistry>,
        before_handle: Option<Hook>,
        after_handle: Option<Hook>,
        running: Arc<AtomicBool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);

        let join = thread::Builder::new()
            .name("esl-dispatcher".into())
            .spawn(move || loop {
                match rx.recv_timeout(IDLE_POLL_INTERVAL) {
                    Ok(event) => dispatch_one(&registry, &before_handle, &after_handle, event),
                    Err(RecvTimeoutError::Timeout) => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn esl dispatcher thread");

        (Self { tx }, join)
    }

    /// Enqueues `event` for dispatch. Silently drops it if the dispatcher
    /// has already shut down — there is nothing left to deliver to.
    pub fn push(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Computes the single highest-priority dispatch key for `event`, per §4.4:
/// `DISCONNECT` overrides everything else when the frame is a disconnect
/// notice; `CUSTOM` events key on their subclass; everything else keys on
/// its own event name.
fn primary_key(event: &Event) -> Option<String> {
    if event.content_type() == Some("text/disconnect-notice") {
        return Some(DISCONNECT.to_string());
    }
    match event.event_name() {
        Some("CUSTOM") => event.event_subclass().map(str::to_string),
        Some(name) => Some(name.to_string()),
        None => None,
    }
}

fn dispatch_one(
    registry: &HandlerRegistry,
    before_handle: &Option<Hook>,
    after_handle: &Option<Hook>,
    event: Event,
) {
    let mut matched_key = None;
    let mut handlers = primary_key(&event)
        .and_then(|key| {
            let list = registry.lookup(&key);
            if list.is_empty() {
                None
            } else {
                matched_key = Some(key);
                Some(list)
            }
        })
        .unwrap_or_default();

    if handlers.is_empty() && event.content_type() == Some("log/data") {
        handlers = registry.lookup(LOG);
        if !handlers.is_empty() {
            matched_key = Some(LOG.to_string());
        }
    }

    if handlers.is_empty() {
        handlers = registry.lookup(WILDCARD);
        if !handlers.is_empty() {
            matched_key = Some(WILDCARD.to_string());
        }
    }

    // Hooks observe every event pulled off the queue, including ones with
    // no matching handler — they're how a session-level mechanism (the
    // outbound expected-event registry) sees events the dispatch-key
    // priority rules would otherwise route to someone else's handler, or
    // drop.
    if let Some(before) = before_handle {
        before(&event);
    }

    if handlers.is_empty() {
        trace!(event_name = ?event.event_name(), "no handler matched, dropping event");
        if let Some(after) = after_handle {
            after(&event);
        }
        return;
    }

    for handler in &handlers {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event)));
        if let Err(payload) = outcome {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(
                handler = handler.name(),
                key = matched_key.as_deref().unwrap_or(""),
                %message,
                "handler panicked; dispatcher continues"
            );
        }
    }

    if let Some(after) = after_handle {
        after(&event);
    }
}
