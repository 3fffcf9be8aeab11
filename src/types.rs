//! Core types for the broker.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{BrokerError, Result};

/// Stable identifier of a participating client process.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client id. Empty or whitespace-only ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(BrokerError::Configuration(
                "client id must not be empty".to_string(),
            ));
        }
        Ok(ClientId(id))
    }

    /// Wrap an id read back from the store, where it was validated on the way in.
    pub(crate) fn from_raw(id: String) -> Self {
        ClientId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        ClientId::new(s)
    }
}

/// Namespaced topic tag of an event, e.g. `"orders.created"`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label(String);

impl Label {
    /// Create a label. Empty labels and the wildcard `"*"` are rejected:
    /// the wildcard is only meaningful to [`LabelSelector`].
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(BrokerError::InvalidLabel("label must not be empty".to_string()));
        }
        if label == LabelSelector::WILDCARD {
            return Err(BrokerError::InvalidLabel(
                "\"*\" is reserved for unsubscribe and cannot be used as a label".to_string(),
            ));
        }
        Ok(Label(label))
    }

    pub(crate) fn from_raw(label: String) -> Self {
        Label(label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({})", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Label {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        Label::new(s)
    }
}

/// Which subscriptions an unsubscribe removes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelSelector {
    /// A single label.
    One(Label),
    /// Every subscription of the client (`"*"`).
    All,
}

impl LabelSelector {
    pub const WILDCARD: &'static str = "*";

    /// Parse `"*"` as [`LabelSelector::All`], anything else as a label.
    pub fn parse(s: &str) -> Result<Self> {
        if s == Self::WILDCARD {
            Ok(LabelSelector::All)
        } else {
            Label::new(s).map(LabelSelector::One)
        }
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelSelector::One(label) => f.write_str(label.as_str()),
            LabelSelector::All => f.write_str(Self::WILDCARD),
        }
    }
}

impl From<Label> for LabelSelector {
    fn from(label: Label) -> Self {
        LabelSelector::One(label)
    }
}

/// Store-assigned event identifier. Strictly increasing in emission order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// An event row exactly as the store returns it, payload still encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: EventId,
    pub label: String,
    pub data: String,
    pub created_at: Timestamp,
}

/// A materialized event delivered to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub label: Label,
    pub data: serde_json::Value,
    pub created_at: Timestamp,
}

impl Event {
    /// Decode the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| BrokerError::Deserialization(e.to_string()))
    }
}

/// Outcome of a single emit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    /// Id assigned to the new event.
    pub event_id: EventId,
    /// Clients that received a delivery marker (the subscriber snapshot).
    pub recipients: Vec<ClientId>,
}

impl Publication {
    /// True if nobody was subscribed; the event is immediately sweep-eligible.
    pub fn is_orphaned(&self) -> bool {
        self.recipients.is_empty()
    }
}
