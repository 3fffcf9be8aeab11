//! Per-label event handlers.

use crate::types::{Event, Label};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked for each delivered event of a label.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle(&self, event: &Event) {
        self(event)
    }
}

/// Maps labels to handlers. One handler per label; the last registration wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Label, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `label`, returning the handler it replaced.
    pub fn register(
        &self,
        label: Label,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        self.handlers.write().insert(label, handler)
    }

    pub fn remove(&self, label: &Label) -> Option<Arc<dyn EventHandler>> {
        self.handlers.write().remove(label)
    }

    pub fn get(&self, label: &Label) -> Option<Arc<dyn EventHandler>> {
        self.handlers.read().get(label).cloned()
    }

    /// Invoke the handler for the event's label. Returns false (and drops the
    /// event) if none is registered.
    ///
    /// The map lock is released before the handler runs, so a handler may
    /// register handlers or stop the broker.
    pub fn dispatch(&self, event: &Event) -> bool {
        match self.get(&event.label) {
            Some(handler) => {
                handler.handle(event);
                true
            }
            None => false,
        }
    }

    pub fn labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self.handlers.read().keys().cloned().collect();
        labels.sort();
        labels
    }
}
