//! Message and connection-change listeners.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::error;

use crate::protocol::{InboundKind, InboundMessage};
use crate::state::ConnectionStatus;

type MessageListener = Arc<dyn Fn(&InboundMessage) + Send + Sync>;
type ConnectionListener = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Message(InboundKind, u64),
    Connection(u64),
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    message: RwLock<HashMap<InboundKind, IndexMap<u64, MessageListener>>>,
    connection: RwLock<IndexMap<u64, ConnectionListener>>,
}

impl Listeners {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_message(
        self: &Arc<Self>,
        kind: InboundKind,
        listener: MessageListener,
    ) -> ListenerHandle {
        let id = self.next_id();
        self.message
            .write()
            .entry(kind)
            .or_default()
            .insert(id, listener);
        ListenerHandle::new(self, Slot::Message(kind, id))
    }

    pub(crate) fn add_connection(self: &Arc<Self>, listener: ConnectionListener) -> ListenerHandle {
        let id = self.next_id();
        self.connection.write().insert(id, listener);
        ListenerHandle::new(self, Slot::Connection(id))
    }

    fn remove(&self, slot: Slot) -> bool {
        match slot {
            Slot::Message(kind, id) => self
                .message
                .write()
                .get_mut(&kind)
                .is_some_and(|m| m.shift_remove(&id).is_some()),
            Slot::Connection(id) => self.connection.write().shift_remove(&id).is_some(),
        }
    }

    pub(crate) fn emit_message(&self, message: &InboundMessage) {
        let kind = message.kind();
        let listeners: Vec<MessageListener> = self
            .message
            .read()
            .get(&kind)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        for listener in listeners {
            invoke_isolated(kind.as_str(), || listener(message));
        }
    }

    pub(crate) fn emit_status(&self, status: ConnectionStatus) {
        let listeners: Vec<ConnectionListener> =
            self.connection.read().values().cloned().collect();
        for listener in listeners {
            invoke_isolated("connection_change", || listener(status));
        }
    }
}

/// Registration returned by `on_message` / `on_connection_change`.
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct ListenerHandle {
    listeners: Weak<Listeners>,
    slot: Slot,
}

impl ListenerHandle {
    fn new(listeners: &Arc<Listeners>, slot: Slot) -> Self {
        Self {
            listeners: Arc::downgrade(listeners),
            slot,
        }
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.remove(self.slot))
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("connection", &self.connection.read().len())
            .finish_non_exhaustive()
    }
}

/// Run a user callback, containing any panic.
pub(crate) fn invoke_isolated(label: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        error!(listener = %label, panic = %panic_message(&*panic), "Listener panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
