//! Per-client unread tracking.
//!
//! A delivery marker `(client_id, event_id)` is written at emit time for every
//! client subscribed to the event's label at that instant (see
//! [`EventLog::append`](crate::event_log::EventLog::append)). It disappears when the
//! client listens, unsubscribes from the label, or stops.
//!
//! Markers are gone once the take commits, so a payload that fails to decode
//! (e.g. written into a shared store by a foreign client) cannot be retried.
//! Such rows are logged and skipped; the rest of the batch is still delivered.

use crate::backend::Backend;
use crate::error::Result;
use crate::event_log::materialize;
use crate::types::{ClientId, Event, LabelSelector};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads and clears delivery markers.
#[derive(Clone)]
pub struct DeliveryTracker {
    backend: Arc<dyn Backend>,
}

impl DeliveryTracker {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Destructively read every event pending for `client`, oldest first.
    ///
    /// Markers are removed in the same atomic step as the read, so an event is
    /// returned at most once per marker. Returns an empty vec when nothing is
    /// pending; never blocks waiting for new events. Undecodable payloads are
    /// skipped with a warning.
    pub fn take(&self, client: &ClientId) -> Result<Vec<Event>> {
        let stored = self.backend.take_unread(client)?;
        if stored.is_empty() {
            return Ok(Vec::new());
        }
        debug!(client = %client, count = stored.len(), "took unread events");

        let mut events = Vec::with_capacity(stored.len());
        for row in stored {
            let (id, label) = (row.id, row.label.clone());
            match materialize(row) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    client = %client,
                    event = %id,
                    label = %label,
                    error = %e,
                    "dropped undecodable event"
                ),
            }
        }
        Ok(events)
    }

    /// Number of events pending for `client`.
    pub fn pending(&self, client: &ClientId) -> Result<u64> {
        self.backend.pending_count(client)
    }

    /// Drop pending markers without reading them.
    pub fn discard(&self, client: &ClientId, selector: &LabelSelector) -> Result<u64> {
        self.backend.clear_unread(client, selector)
    }
}
