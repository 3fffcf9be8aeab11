//! Broker schema, one DDL script per dialect.
//!
//! events(id PK, label, data, created_at)
//! subscriptions(client_id, label, created_at, PK(client_id, label))
//! delivery_markers(client_id, event_id, PK(client_id, event_id),
//!                  FK event_id -> events.id ON DELETE CASCADE)
//!
//! `created_at` holds microseconds since the Unix epoch in both dialects.

/// SQLite schema. `AUTOINCREMENT` keeps ids from being reused once the
/// newest event has been swept.
pub(crate) const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS subscriptions (
    client_id TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (client_id, label)
);
CREATE INDEX IF NOT EXISTS subscriptions_label_idx ON subscriptions (label);
CREATE TABLE IF NOT EXISTS delivery_markers (
    client_id TEXT NOT NULL,
    event_id INTEGER NOT NULL,
    PRIMARY KEY (client_id, event_id),
    FOREIGN KEY (event_id) REFERENCES events (id) ON DELETE CASCADE
);
";

/// PostgreSQL schema.
pub(crate) const POSTGRES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id BIGSERIAL PRIMARY KEY,
    label TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS subscriptions (
    client_id TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    PRIMARY KEY (client_id, label)
);
CREATE INDEX IF NOT EXISTS subscriptions_label_idx ON subscriptions (label);
CREATE TABLE IF NOT EXISTS delivery_markers (
    client_id TEXT NOT NULL,
    event_id BIGINT NOT NULL,
    PRIMARY KEY (client_id, event_id),
    FOREIGN KEY (event_id) REFERENCES events (id) ON DELETE CASCADE
);
";

/// Advisory lock key serializing concurrent schema creation on PostgreSQL,
/// where racing `CREATE TABLE IF NOT EXISTS` statements can still collide.
pub(crate) const POSTGRES_SCHEMA_LOCK: i64 = 0x5941_5050_4552; // "YAPPER"
