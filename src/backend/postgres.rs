//! PostgreSQL backend (postgres + r2d2).

use super::schema::{POSTGRES_SCHEMA, POSTGRES_SCHEMA_LOCK};
use super::{Backend, BackendKind};
use crate::error::Result;
use crate::types::{ClientId, EventId, Label, LabelSelector, Publication, StoredEvent, Timestamp};
use postgres::{Config, NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::debug;

type Manager = PostgresConnectionManager<NoTls>;

const SELECT_EVENT_COLUMNS: &str = "SELECT e.id, e.label, e.data, e.created_at FROM events e";

/// Shared durable store.
pub struct PostgresBackend {
    pool: Pool<Manager>,
}

impl PostgresBackend {
    /// Connect to the store at `uri` (a `postgresql://` URL or key/value string).
    pub fn connect(uri: &str, pool_size: u32) -> Result<Self> {
        let config: Config = uri.parse()?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        debug!(pool_size, "opened postgres backend");
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<Manager>> {
        Ok(self.pool.get()?)
    }
}

fn stored_event(row: &Row) -> Result<StoredEvent> {
    Ok(StoredEvent {
        id: EventId(row.try_get(0)?),
        label: row.try_get(1)?,
        data: row.try_get(2)?,
        created_at: Timestamp(row.try_get(3)?),
    })
}

fn first_column<T>(rows: Vec<Row>, wrap: impl Fn(String) -> T) -> Result<Vec<T>> {
    rows.iter()
        .map(|row| Ok(wrap(row.try_get::<_, String>(0)?)))
        .collect()
}

impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&POSTGRES_SCHEMA_LOCK])?;
        tx.batch_execute(POSTGRES_SCHEMA)?;
        tx.commit()?;
        Ok(())
    }

    fn insert_subscription(
        &self,
        client: &ClientId,
        label: &Label,
        at: Timestamp,
    ) -> Result<bool> {
        let inserted = self.conn()?.execute(
            "INSERT INTO subscriptions (client_id, label, created_at) VALUES ($1, $2, $3)
             ON CONFLICT (client_id, label) DO NOTHING",
            &[&client.as_str(), &label.as_str(), &at.0],
        )?;
        Ok(inserted > 0)
    }

    fn delete_subscriptions(&self, client: &ClientId, selector: &LabelSelector) -> Result<u64> {
        let mut conn = self.conn()?;
        let removed = match selector {
            LabelSelector::All => conn.execute(
                "DELETE FROM subscriptions WHERE client_id = $1",
                &[&client.as_str()],
            )?,
            LabelSelector::One(label) => conn.execute(
                "DELETE FROM subscriptions WHERE client_id = $1 AND label = $2",
                &[&client.as_str(), &label.as_str()],
            )?,
        };
        Ok(removed)
    }

    fn subscribers_of(&self, label: &Label) -> Result<Vec<ClientId>> {
        let rows = self.conn()?.query(
            "SELECT client_id FROM subscriptions WHERE label = $1 ORDER BY client_id",
            &[&label.as_str()],
        )?;
        first_column(rows, ClientId::from_raw)
    }

    fn labels_of(&self, client: &ClientId) -> Result<Vec<Label>> {
        let rows = self.conn()?.query(
            "SELECT label FROM subscriptions WHERE client_id = $1 ORDER BY label",
            &[&client.as_str()],
        )?;
        first_column(rows, Label::from_raw)
    }

    fn publish(&self, label: &Label, data: &str, at: Timestamp) -> Result<Publication> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;

        let event_id: i64 = tx
            .query_one(
                "INSERT INTO events (label, data, created_at) VALUES ($1, $2, $3) RETURNING id",
                &[&label.as_str(), &data, &at.0],
            )?
            .try_get(0)?;

        let rows = tx.query(
            "SELECT client_id FROM subscriptions WHERE label = $1 ORDER BY client_id",
            &[&label.as_str()],
        )?;
        let recipients = first_column(rows, ClientId::from_raw)?;

        if !recipients.is_empty() {
            let ids: Vec<&str> = recipients.iter().map(ClientId::as_str).collect();
            tx.execute(
                "INSERT INTO delivery_markers (client_id, event_id)
                 SELECT client_id, $2::BIGINT FROM UNNEST($1::TEXT[]) AS t (client_id)",
                &[&ids, &event_id],
            )?;
        }

        tx.commit()?;
        Ok(Publication {
            event_id: EventId(event_id),
            recipients,
        })
    }

    fn find_event(&self, id: EventId) -> Result<Option<StoredEvent>> {
        let row = self.conn()?.query_opt(
            &format!("{} WHERE e.id = $1", SELECT_EVENT_COLUMNS),
            &[&id.0],
        )?;
        row.as_ref().map(stored_event).transpose()
    }

    fn event_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_one("SELECT COUNT(*) FROM events", &[])?
            .try_get(0)?;
        Ok(count as u64)
    }

    fn take_unread(&self, client: &ClientId) -> Result<Vec<StoredEvent>> {
        // One statement: the markers are deleted and their events read from
        // the same snapshot, so nothing is lost between fetch and delete.
        let rows = self.conn()?.query(
            "WITH taken AS (
                 DELETE FROM delivery_markers WHERE client_id = $1 RETURNING event_id
             )
             SELECT e.id, e.label, e.data, e.created_at
             FROM events e JOIN taken t ON t.event_id = e.id
             ORDER BY e.id",
            &[&client.as_str()],
        )?;
        rows.iter().map(stored_event).collect()
    }

    fn clear_unread(&self, client: &ClientId, selector: &LabelSelector) -> Result<u64> {
        let mut conn = self.conn()?;
        let removed = match selector {
            LabelSelector::All => conn.execute(
                "DELETE FROM delivery_markers WHERE client_id = $1",
                &[&client.as_str()],
            )?,
            LabelSelector::One(label) => conn.execute(
                "DELETE FROM delivery_markers WHERE client_id = $1
                 AND event_id IN (SELECT id FROM events WHERE label = $2)",
                &[&client.as_str(), &label.as_str()],
            )?,
        };
        Ok(removed)
    }

    fn pending_count(&self, client: &ClientId) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_one(
                "SELECT COUNT(*) FROM delivery_markers WHERE client_id = $1",
                &[&client.as_str()],
            )?
            .try_get(0)?;
        Ok(count as u64)
    }

    fn delete_unreferenced_events(&self) -> Result<u64> {
        let removed = self.conn()?.execute(
            "DELETE FROM events WHERE NOT EXISTS (
                 SELECT 1 FROM delivery_markers m WHERE m.event_id = events.id
             )",
            &[],
        )?;
        Ok(removed)
    }
}
