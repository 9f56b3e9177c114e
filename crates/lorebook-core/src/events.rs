//! Lifecycle event bus.
//!
//! Collaborators (the chat layer, CLI, tests) observe engine lifecycle changes
//! through a small publish/subscribe bus. Events are a closed sum type with
//! named fields; there are no string-keyed payload maps.
//!
//! Listeners are invoked synchronously in registration order from the thread
//! that performs the mutation, so they must return quickly and must not block.
//! A panicking listener is logged and does not prevent subsequent listeners
//! from running.

use crate::kb::KbOrigin;
use crate::state::RetrievalMode;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::warn;

/// Lifecycle notifications published by the engine.
#[derive(Debug, Clone)]
pub enum RagEvent {
    /// Persisted state was loaded at startup
    StateLoaded {
        /// Whether retrieval is enabled
        enabled: bool,
        /// Restored retrieval mode
        mode: RetrievalMode,
        /// Restored active knowledge-base name
        active_name: Option<String>,
    },
    /// The enabled flag was set
    EnabledChanged {
        /// Previous value
        old: bool,
        /// New value
        new: bool,
    },
    /// The retrieval mode was set
    ModeChanged {
        /// Previous mode
        old: RetrievalMode,
        /// New mode
        new: RetrievalMode,
    },
    /// A knowledge base was ingested and registered
    KbAdded {
        /// Knowledge-base name
        name: String,
        /// Source document path
        path: PathBuf,
        /// Number of ingested chunks
        chunk_count: usize,
        /// System or user origin
        origin: KbOrigin,
    },
    /// A knowledge base was removed from the registry
    KbRemoved {
        /// Knowledge-base name
        name: String,
    },
    /// The active knowledge base changed via `switch_kb`
    KbSwitched {
        /// Newly active knowledge-base name
        name: String,
        /// Its source document path
        path: PathBuf,
    },
    /// The one-shot system directory scan completed
    SystemKbsLoaded {
        /// Number of system knowledge bases loaded
        count: usize,
    },
}

type Listener = Arc<dyn Fn(&RagEvent) + Send + Sync>;
type ListenerList = RwLock<Vec<(u64, Listener)>>;

/// Multi-listener publish/subscribe bus.
///
/// The engine owns the bus; subscribers hold a revocable [`Subscription`]
/// with only a weak back-reference, so dropping the engine releases the
/// listeners regardless of outstanding handles.
#[derive(Default)]
pub struct EventBus {
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener, returning a handle that can revoke it.
    pub fn subscribe(
        &self,
        listener: impl Fn(&RagEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Delivers `event` to every listener, in registration order.
    ///
    /// A panicking listener is logged at `warn!` and skipped; the remaining
    /// listeners still run.
    pub fn emit(&self, event: &RagEvent) {
        let snapshot: Vec<Listener> = {
            let listeners = match self.listeners.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(?event, "event listener panicked");
            }
        }
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        match self.listeners.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Handle revoking a registered listener.
///
/// Dropping the handle does NOT unsubscribe; the listener lives until
/// [`Subscription::cancel`] is called or the bus is dropped.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Removes the listener from the bus.
    pub fn cancel(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = match listeners.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            listeners.retain(|(listener_id, _)| *listener_id != self.id);
        }
    }
}
