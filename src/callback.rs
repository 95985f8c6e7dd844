//! Scheduler callbacks.
//!
//! A [`Callback`] wraps a shared closure together with a stable identity.
//! Containers inside the scheduler deduplicate on that identity: clones of
//! one `Callback` compare equal, two separately constructed callbacks do
//! not, even if they wrap the same function.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use crate::connector::Connector;
use crate::error::Result;
use crate::event::Events;

/// Everything a callback learns about the reason it fires.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    /// The time the entry was dispatched by the scheduler main loop.
    pub now: Instant,
    /// The event bits responsible for this invocation.
    pub events: Events,
    /// The connector the events fired on, for I/O callbacks.
    pub connector: Option<Connector>,
}

type CallbackFn = dyn Fn(&CallbackContext) -> Result<()> + Send + Sync;

/// A shareable callback with identity semantics.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<CallbackFn>,
}

impl Callback {
    pub fn new<F>(f: F) -> Callback
    where
        F: Fn(&CallbackContext) -> Result<()> + Send + Sync + 'static,
    {
        Callback { inner: Arc::new(f) }
    }

    pub fn invoke(&self, ctx: &CallbackContext) -> Result<()> {
        (self.inner)(ctx)
    }

    fn ident(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Callback) -> bool {
        self.ident() == other.ident()
    }
}

impl Eq for Callback {}

impl Hash for Callback {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident().hash(state);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:#x})", self.ident())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn noop(_: &CallbackContext) -> Result<()> {
        Ok(())
    }

    #[test]
    fn clones_share_identity() {
        let a = Callback::new(noop);
        let b = a.clone();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn separate_callbacks_differ() {
        // Same function, two wrappers.
        let a = Callback::new(noop);
        let b = Callback::new(noop);
        assert_ne!(a, b);
    }
}
