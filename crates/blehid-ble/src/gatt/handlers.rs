//! Event handler registry shared by the GATT backends

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use super::{GattServiceEvent, HandlerId};

/// Registered event sinks keyed by handler id
#[derive(Debug, Default)]
pub struct EventHandlers {
    sinks: Mutex<BTreeMap<HandlerId, mpsc::UnboundedSender<GattServiceEvent>>>,
    next_id: AtomicU64,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: mpsc::UnboundedSender<GattServiceEvent>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sink);
        trace!("Registered GATT event {}", id);
        id
    }

    pub fn unregister(&self, id: HandlerId) -> bool {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn clear(&self) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every sink, dropping sinks whose receiver is gone
    pub fn emit(&self, event: GattServiceEvent) {
        let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        sinks.retain(|id, sink| {
            let alive = sink.send(event.clone()).is_ok();
            if !alive {
                trace!("Dropping closed GATT event {}", id);
            }
            alive
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_register_emit_unregister() {
        let handlers = EventHandlers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = handlers.register(tx);
        assert_eq!(handlers.len(), 1);

        let event = GattServiceEvent::ReadRequested {
            characteristic: Uuid::nil(),
            client: None,
        };
        handlers.emit(event.clone());
        assert_eq!(rx.try_recv().unwrap(), event);

        assert!(handlers.unregister(id));
        assert!(!handlers.unregister(id));
        assert!(handlers.is_empty());
    }

    #[test]
    fn test_closed_sinks_are_dropped() {
        let handlers = EventHandlers::new();
        let (tx, rx) = mpsc::unbounded_channel();
        handlers.register(tx);
        drop(rx);

        handlers.emit(GattServiceEvent::ReadRequested {
            characteristic: Uuid::nil(),
            client: None,
        });
        assert!(handlers.is_empty());
    }
}
