//! # Yapper
//!
//! A durable publish/subscribe event broker built on a transactional
//! relational store. Every participating process opens a [`Broker`] under a
//! stable client id; all delivery state lives in the shared store.
//!
//! ## Core Concepts
//!
//! - **Labels**: Namespaced topic tags events are emitted under
//! - **Subscriptions**: Which client wants which label
//! - **Delivery markers**: Per-client "unread" rows written at emit time for
//!   every client subscribed at that instant
//! - **Listen**: Destructive read of a client's markers, oldest event first
//! - **Sweep**: Deletes events no marker references any more
//!
//! ## Example
//!
//! ```ignore
//! use yapper::{Broker, BrokerConfig, BackendConfig};
//! use serde_json::json;
//!
//! let broker = Broker::connect(BrokerConfig::new("billing", BackendConfig::memory()))?;
//! broker.start()?;
//!
//! broker.subscribe("orders")?;
//! broker.emit("orders", json!({"x": 1}))?;
//!
//! let events = broker.listen()?;
//! assert_eq!(events[0].data, json!({"x": 1}));
//! assert!(broker.listen()?.is_empty());
//!
//! broker.stop()?;
//! ```

pub mod backend;
pub mod broker;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod event_log;
pub mod registry;
pub mod sweep;
pub mod types;

// Re-exports
pub use backend::{Backend, BackendKind, PostgresBackend, SqliteBackend};
pub use broker::{Broker, BrokerState, DEFAULT_POLL_INTERVAL};
pub use config::{BackendConfig, BrokerConfig, Environment, SqliteLocation};
pub use delivery::DeliveryTracker;
pub use dispatch::{EventHandler, HandlerRegistry, StopHandle};
pub use error::{BrokerError, Result};
pub use event_log::EventLog;
pub use registry::{SubscriptionRegistry, Unsubscribed};
pub use sweep::{SweepStats, Sweeper};
pub use types::*;
