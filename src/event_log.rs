//! Event log and payload codec.
//!
//! Payloads are `serde_json::Value`s stored as JSON text. `Null` stands for
//! "no data" and is stored as the empty object, so a payload always reads back
//! as a structured value equal to what was emitted.

use crate::backend::Backend;
use crate::error::{BrokerError, Result};
use crate::types::{Event, EventId, Label, Publication, StoredEvent, Timestamp};
use serde_json::Value;
use std::sync::Arc;

/// Encode a payload for storage.
pub fn encode_payload(data: &Value) -> Result<String> {
    match data {
        Value::Null => Ok("{}".to_string()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Decode a payload read back from the store.
pub fn decode_payload(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| BrokerError::Deserialization(e.to_string()))
}

/// Materialize a stored row into an [`Event`].
pub fn materialize(stored: StoredEvent) -> Result<Event> {
    Ok(Event {
        id: stored.id,
        data: decode_payload(&stored.data)?,
        label: Label::from_raw(stored.label),
        created_at: stored.created_at,
    })
}

/// Append-only log of emitted events.
#[derive(Clone)]
pub struct EventLog {
    backend: Arc<dyn Backend>,
}

impl EventLog {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Append an event and fan it out to the current subscribers of its label.
    ///
    /// The event row, the subscriber snapshot and one delivery marker per
    /// subscriber are committed together. Subscribers arriving later never
    /// receive it. With no subscribers the event is immediately sweep-eligible;
    /// that is not an error.
    pub fn append(&self, label: &Label, data: &Value) -> Result<Publication> {
        let encoded = encode_payload(data)?;
        self.backend.publish(label, &encoded, Timestamp::now())
    }

    /// Look up a single event, if it has not been swept.
    pub fn get(&self, id: EventId) -> Result<Option<Event>> {
        self.backend.find_event(id)?.map(materialize).transpose()
    }

    /// Number of events currently in the log.
    pub fn len(&self) -> Result<u64> {
        self.backend.event_count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
