//! Store adapters.
//!
//! A [`Backend`] owns a connection pool to one relational store and exposes
//! the row-level operations the broker components are built from. Every call
//! checks a connection out of the pool, runs in autocommit mode (or inside a
//! single transaction where noted) and returns the connection on drop, error
//! paths included.
//!
//! Two conforming variants exist:
//! - [`SqliteBackend`]: embedded store, in-memory or file-backed. Intended for
//!   development and tests; a file store can be shared by processes on one host.
//! - [`PostgresBackend`]: shared durable store for staging and production.
//!
//! Both must be observably identical; `tests/backend_contract.rs` runs one
//! suite against each.

mod postgres;
mod schema;
mod sqlite;

pub use self::postgres::PostgresBackend;
pub use self::sqlite::SqliteBackend;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::types::{ClientId, EventId, Label, LabelSelector, Publication, StoredEvent, Timestamp};
use std::fmt;
use std::sync::Arc;

/// Which store a backend talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => f.write_str("sqlite"),
            BackendKind::Postgres => f.write_str("postgres"),
        }
    }
}

/// Row-level operations against the broker schema.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create tables and indexes if they do not exist. Idempotent.
    fn ensure_schema(&self) -> Result<()>;

    // --- Subscriptions ---

    /// Insert a subscription row. Returns false if it already existed.
    fn insert_subscription(&self, client: &ClientId, label: &Label, at: Timestamp)
        -> Result<bool>;

    /// Delete the selected subscription rows of a client. Returns rows removed.
    fn delete_subscriptions(&self, client: &ClientId, selector: &LabelSelector) -> Result<u64>;

    /// Clients currently subscribed to `label`, ordered by id.
    fn subscribers_of(&self, label: &Label) -> Result<Vec<ClientId>>;

    /// Labels `client` is currently subscribed to, ordered.
    fn labels_of(&self, client: &ClientId) -> Result<Vec<Label>>;

    // --- Events ---

    /// Append an event and write one delivery marker per current subscriber
    /// of its label, all in one transaction.
    fn publish(&self, label: &Label, data: &str, at: Timestamp) -> Result<Publication>;

    fn find_event(&self, id: EventId) -> Result<Option<StoredEvent>>;

    fn event_count(&self) -> Result<u64>;

    // --- Delivery markers ---

    /// Atomically fetch and delete every pending marker of `client`.
    /// Events come back in ascending id order.
    fn take_unread(&self, client: &ClientId) -> Result<Vec<StoredEvent>>;

    /// Delete the pending markers of `client` whose events carry a selected
    /// label, without reading them. Returns rows removed.
    fn clear_unread(&self, client: &ClientId, selector: &LabelSelector) -> Result<u64>;

    fn pending_count(&self, client: &ClientId) -> Result<u64>;

    // --- Sweep ---

    /// Delete every event that no delivery marker references, in a single
    /// statement. Returns rows removed.
    fn delete_unreferenced_events(&self) -> Result<u64>;
}

/// Open the backend described by `config`.
pub fn open(config: &BackendConfig, pool_size: u32) -> Result<Arc<dyn Backend>> {
    match config {
        BackendConfig::Sqlite { location } => {
            Ok(Arc::new(SqliteBackend::open(location.clone(), pool_size)?))
        }
        BackendConfig::Postgres { uri } => Ok(Arc::new(PostgresBackend::connect(uri, pool_size)?)),
    }
}
