use std::sync::Arc;

use indexmap::IndexMap;
use std::sync::Mutex;

use esl_utils::short_typename;

use crate::error::Error;
use crate::event::Event;

/// Wildcard dispatch key: fires only when nothing more specific matched.
pub const WILDCARD: &str = "*";
/// Dispatch key for `log/data` frames with no more specific match.
pub const LOG: &str = "log";
/// Dispatch key for `text/disconnect-notice` frames.
pub const DISCONNECT: &str = "DISCONNECT";

/// A registered callback for dispatched events.
///
/// Handlers must expose a stable diagnostic [`name`](Handler::name) rather
/// than relying on address/type introspection, so dispatch failures can be
/// logged meaningfully (§9).
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, event: &Event);
}

/// Adapts a plain closure into a [`Handler`] under an explicit label.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Labels the handler with the short type name of `F`, for callers that
    /// don't want to name every closure by hand.
    pub fn unnamed(f: F) -> Self {
        Self { name: short_typename::<F>(), f }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &Event) {
        (self.f)(event)
    }
}

/// Ordered mapping from dispatch key to the handlers registered under it.
///
/// Mutated only by the owning connection/session (via `register`/
/// `unregister`); external callers go through `register_handle`/
/// `unregister_handle` on `InboundESL`/`OutboundSession`, which just forward
/// here.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<IndexMap<String, Vec<Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent per (key, handler): registering the same `Arc` under the
    /// same key twice is a no-op.
    pub fn register(&self, key: impl Into<String>, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let list = handlers.entry(key.into()).or_default();
        if !list.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            list.push(handler);
        }
    }

    /// Fails with [`Error::InvalidArgument`] if `key` was never registered.
    /// Removing a handler not present under a known key is a no-op.
    pub fn unregister(&self, key: &str, handler: &Arc<dyn Handler>) -> Result<(), Error> {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        match handlers.get_mut(key) {
            Some(list) => {
                list.retain(|existing| !Arc::ptr_eq(existing, handler));
                Ok(())
            }
            None => Err(Error::InvalidArgument(format!("unknown handler key: {key}"))),
        }
    }

    /// Returns a snapshot of the handlers registered under `key`, in
    /// registration order. Cloning the list out lets callers invoke
    /// handlers without holding the registry lock (so a handler registering
    /// or unregistering another handler can't deadlock).
    pub fn lookup(&self, key: &str) -> Vec<Arc<dyn Handler>> {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_any(&self, key: &str) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|list| !list.is_empty())
    }
}
