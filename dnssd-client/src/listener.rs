use crate::error::Error;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Identifies a listener, for later removal
///
/// Ids are unique across the whole process, so passing an id to the
/// wrong `remove_*` method simply finds nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of listeners
pub(crate) struct Listeners<T> {
    entries: Vec<(ListenerId, Handler<T>)>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Listeners<T> {
    pub(crate) fn add(&mut self, handler: Handler<T>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.push((id, handler));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(i, _)| *i != id);
        self.entries.len() != before
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy out the handlers, so they can be called without a lock held
    pub(crate) fn snapshot(&self) -> Vec<Handler<T>> {
        self.entries.iter().map(|(_, h)| h.clone()).collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Call each handler in order
///
/// A panicking handler is logged and skipped; the rest still run.
pub(crate) fn fan_out<T>(handlers: &[Handler<T>], value: &T) {
    for handler in handlers {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(value)))
        {
            let err = Error::Listener(panic_message(&*payload));
            error!(%err, "listener failed");
        }
    }
}
