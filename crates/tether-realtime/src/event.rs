//! Lifecycle events and the per-connection callback registry.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Events a server-side [`Connection`](crate::Connection) reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Registered with the hub; pumps are starting.
    Open,
    /// The connection is gone.
    Close,
    /// Abnormal closure or a failing handler.
    Error,
}

/// Events a [`Connector`](crate::Connector) reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorEvent {
    /// A dial succeeded.
    Open,
    /// The connector stopped for good.
    Close,
    /// Abnormal closure or a failing handler.
    Error,
    /// An application frame arrived.
    Message,
    /// First failed dial of a losing streak.
    Reconnecting,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleEvent::Open => "open",
            LifecycleEvent::Close => "close",
            LifecycleEvent::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ConnectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorEvent::Open => "open",
            ConnectorEvent::Close => "close",
            ConnectorEvent::Error => "error",
            ConnectorEvent::Message => "message",
            ConnectorEvent::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

/// Ordered callback lists keyed by event.
///
/// `register` may run concurrently with emission; emitters snapshot the list
/// and invoke callbacks with no lock held.
pub(crate) struct Callbacks<E, F: ?Sized> {
    handlers: RwLock<HashMap<E, Vec<Arc<F>>>>,
}

impl<E: Eq + Hash, F: ?Sized> Callbacks<E, F> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, event: E, callback: Arc<F>) {
        self.handlers.write().entry(event).or_default().push(callback);
    }

    pub(crate) fn snapshot(&self, event: &E) -> Vec<Arc<F>> {
        self.handlers
            .read()
            .get(event)
            .map(|list| list.to_vec())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn count(&self, event: &E) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }
}

impl<E, F: ?Sized> fmt::Debug for Callbacks<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// Run `f`, turning a panic into an error message.
pub(crate) fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        }
    })
}
