//! SQLite backend (rusqlite + r2d2).

use super::schema::SQLITE_SCHEMA;
use super::{Backend, BackendKind};
use crate::config::SqliteLocation;
use crate::error::Result;
use crate::types::{ClientId, EventId, Label, LabelSelector, Publication, StoredEvent, Timestamp};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::time::Duration;
use tracing::debug;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_EVENT_COLUMNS: &str = "SELECT e.id, e.label, e.data, e.created_at FROM events e";

/// Embedded SQLite store.
///
/// An in-memory store is backed by a single pooled connection that never
/// expires: the database is private to this backend and lives exactly as long
/// as it does. Share it between brokers through `Arc<dyn Backend>`.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    location: SqliteLocation,
}

impl SqliteBackend {
    /// Open (or create) the store at `location`.
    pub fn open(location: SqliteLocation, pool_size: u32) -> Result<Self> {
        let (manager, builder) = match &location {
            SqliteLocation::Memory => (
                SqliteConnectionManager::memory(),
                Pool::builder()
                    .max_size(1)
                    .min_idle(Some(1))
                    .idle_timeout(None)
                    .max_lifetime(None),
            ),
            SqliteLocation::File(path) => (
                SqliteConnectionManager::file(path),
                Pool::builder().max_size(pool_size),
            ),
        };

        let wal = matches!(location, SqliteLocation::File(_));
        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            if wal {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
            }
            Ok(())
        });

        let pool = builder.build(manager)?;
        debug!(location = ?location, "opened sqlite backend");
        Ok(Self { pool, location })
    }

    /// Open a fresh private in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::open(SqliteLocation::Memory, 1)
    }

    pub fn location(&self) -> &SqliteLocation {
        &self.location
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

fn stored_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        id: EventId(row.get(0)?),
        label: row.get(1)?,
        data: row.get(2)?,
        created_at: Timestamp(row.get(3)?),
    })
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(SQLITE_SCHEMA)?;
        Ok(())
    }

    fn insert_subscription(
        &self,
        client: &ClientId,
        label: &Label,
        at: Timestamp,
    ) -> Result<bool> {
        let inserted = self.conn()?.execute(
            "INSERT INTO subscriptions (client_id, label, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (client_id, label) DO NOTHING",
            params![client.as_str(), label.as_str(), at.0],
        )?;
        Ok(inserted > 0)
    }

    fn delete_subscriptions(&self, client: &ClientId, selector: &LabelSelector) -> Result<u64> {
        let conn = self.conn()?;
        let removed = match selector {
            LabelSelector::All => conn.execute(
                "DELETE FROM subscriptions WHERE client_id = ?1",
                params![client.as_str()],
            )?,
            LabelSelector::One(label) => conn.execute(
                "DELETE FROM subscriptions WHERE client_id = ?1 AND label = ?2",
                params![client.as_str(), label.as_str()],
            )?,
        };
        Ok(removed as u64)
    }

    fn subscribers_of(&self, label: &Label) -> Result<Vec<ClientId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT client_id FROM subscriptions WHERE label = ?1 ORDER BY client_id",
        )?;
        let clients = stmt
            .query_map(params![label.as_str()], |row| row.get::<_, String>(0))?
            .map(|id| id.map(ClientId::from_raw))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(clients)
    }

    fn labels_of(&self, client: &ClientId) -> Result<Vec<Label>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT label FROM subscriptions WHERE client_id = ?1 ORDER BY label",
        )?;
        let labels = stmt
            .query_map(params![client.as_str()], |row| row.get::<_, String>(0))?
            .map(|label| label.map(Label::from_raw))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    fn publish(&self, label: &Label, data: &str, at: Timestamp) -> Result<Publication> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front, so no sweep or listen can
        // interleave between the event insert and its markers.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let event_id: i64 = tx.query_row(
            "INSERT INTO events (label, data, created_at) VALUES (?1, ?2, ?3) RETURNING id",
            params![label.as_str(), data, at.0],
            |row| row.get(0),
        )?;

        let recipients = {
            let mut select = tx.prepare(
                "SELECT client_id FROM subscriptions WHERE label = ?1 ORDER BY client_id",
            )?;
            let recipients = select
                .query_map(params![label.as_str()], |row| row.get::<_, String>(0))?
                .map(|id| id.map(ClientId::from_raw))
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut insert = tx.prepare(
                "INSERT INTO delivery_markers (client_id, event_id) VALUES (?1, ?2)",
            )?;
            for client in &recipients {
                insert.execute(params![client.as_str(), event_id])?;
            }
            recipients
        };

        tx.commit()?;
        Ok(Publication {
            event_id: EventId(event_id),
            recipients,
        })
    }

    fn find_event(&self, id: EventId) -> Result<Option<StoredEvent>> {
        let event = self
            .conn()?
            .query_row(
                &format!("{} WHERE e.id = ?1", SELECT_EVENT_COLUMNS),
                params![id.0],
                stored_event,
            )
            .optional()?;
        Ok(event)
    }

    fn event_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn take_unread(&self, client: &ClientId) -> Result<Vec<StoredEvent>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let events = {
            let mut stmt = tx.prepare(&format!(
                "{} JOIN delivery_markers m ON m.event_id = e.id
                 WHERE m.client_id = ?1 ORDER BY e.id",
                SELECT_EVENT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![client.as_str()], stored_event)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            "DELETE FROM delivery_markers WHERE client_id = ?1",
            params![client.as_str()],
        )?;

        tx.commit()?;
        Ok(events)
    }

    fn clear_unread(&self, client: &ClientId, selector: &LabelSelector) -> Result<u64> {
        let conn = self.conn()?;
        let removed = match selector {
            LabelSelector::All => conn.execute(
                "DELETE FROM delivery_markers WHERE client_id = ?1",
                params![client.as_str()],
            )?,
            LabelSelector::One(label) => conn.execute(
                "DELETE FROM delivery_markers WHERE client_id = ?1
                 AND event_id IN (SELECT id FROM events WHERE label = ?2)",
                params![client.as_str(), label.as_str()],
            )?,
        };
        Ok(removed as u64)
    }

    fn pending_count(&self, client: &ClientId) -> Result<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM delivery_markers WHERE client_id = ?1",
            params![client.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn delete_unreferenced_events(&self) -> Result<u64> {
        let removed = self.conn()?.execute(
            "DELETE FROM events WHERE NOT EXISTS (
                 SELECT 1 FROM delivery_markers m WHERE m.event_id = events.id
             )",
            [],
        )?;
        Ok(removed as u64)
    }
}
