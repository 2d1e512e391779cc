use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use super::peer::SocketCore;
use super::{Socket, SocketPattern};
use crate::error::TransportError;

/// Owns the `inproc://` namespace shared by the sockets created from it.
///
/// Cheap to clone; clones share the namespace.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    endpoints: Mutex<HashMap<String, Weak<SocketCore>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide context used when none is supplied
    pub fn global() -> Context {
        static GLOBAL: OnceLock<Context> = OnceLock::new();
        GLOBAL.get_or_init(Context::new).clone()
    }

    pub fn socket(&self, pattern: SocketPattern) -> Socket {
        Socket::new(self.clone(), pattern)
    }

    pub(crate) fn register(&self, name: &str, core: &Arc<SocketCore>) -> Result<(), TransportError> {
        let mut endpoints = self.inner.endpoints.lock();
        if endpoints.get(name).is_some_and(|w| w.strong_count() > 0) {
            return Err(TransportError::AddressInUse(format!("inproc://{name}")));
        }
        endpoints.insert(name.to_string(), Arc::downgrade(core));
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<SocketCore>> {
        self.inner.endpoints.lock().get(name).and_then(Weak::upgrade)
    }

    /// Free `name` if it is still bound to `core`
    pub(crate) fn release(&self, name: &str, core: &Arc<SocketCore>) {
        let mut endpoints = self.inner.endpoints.lock();
        if endpoints
            .get(name)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(core)))
        {
            endpoints.remove(name);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("inproc_endpoints", &self.inner.endpoints.lock().len())
            .finish()
    }
}
