//! Database schema definitions.
//!
//! Four tables back the storage channels. Every row has a store-assigned,
//! strictly increasing `id` and a `created` timestamp set on insert. Payload
//! columns are `BYTEA` and are never interpreted by this crate.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::PgRow;

/// The tables owned by the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Pending work items, consumed in FIFO order.
    Queue,
    /// Work items deferred until a timestamp.
    Schedule,
    /// Results of completed tasks, looked up by key.
    Results,
    /// Append-only pub/sub messages, grouped by channel.
    Events,
}

impl Table {
    /// Every table, in creation order.
    pub const ALL: [Table; 4] = [Table::Queue, Table::Schedule, Table::Results, Table::Events];

    /// The SQL name of the table.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Queue => "task_queue",
            Table::Schedule => "task_schedule",
            Table::Results => "task_results",
            Table::Events => "task_events",
        }
    }

    /// Column list used for selects and `RETURNING` clauses.
    pub(crate) const fn columns(self) -> &'static str {
        match self {
            Table::Queue => "id, item, created",
            Table::Schedule => "id, item, ts, created",
            Table::Results => "id, key, result, created",
            Table::Events => "id, channel, message, created",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A row type stored in one of the backend's tables.
pub(crate) trait Record: for<'r> FromRow<'r, PgRow> + Send + Unpin {
    /// The table rows of this type live in.
    const TABLE: Table;
}

/// A pending work item.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct QueueItem {
    /// Unique identifier, equal to the enqueue order
    pub id: i64,
    /// Opaque serialized task
    #[sqlx(rename = "item")]
    pub payload: Vec<u8>,
    /// Timestamp when the item was enqueued
    pub created: DateTime<Utc>,
}

/// A work item waiting for its due time.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ScheduleItem {
    /// Unique identifier
    pub id: i64,
    /// Opaque serialized task
    #[sqlx(rename = "item")]
    pub payload: Vec<u8>,
    /// Unix timestamp (seconds) at which the item becomes ready
    #[sqlx(rename = "ts")]
    pub due_at: i64,
    /// Timestamp when the item was scheduled
    pub created: DateTime<Utc>,
}

/// A stored task result.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResultItem {
    /// Unique identifier; the greatest id for a key is the current value
    pub id: i64,
    /// Lookup key, not unique at the storage level
    pub key: String,
    /// Opaque serialized result or error
    #[sqlx(rename = "result")]
    pub value: Vec<u8>,
    /// Timestamp when the result was written
    pub created: DateTime<Utc>,
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EventItem {
    /// Unique identifier, usable as a subscriber cursor
    pub id: i64,
    /// Channel the message was published on
    pub channel: String,
    /// Opaque serialized message
    pub message: Vec<u8>,
    /// Timestamp when the message was published
    pub created: DateTime<Utc>,
}

impl Record for QueueItem {
    const TABLE: Table = Table::Queue;
}

impl Record for ScheduleItem {
    const TABLE: Table = Table::Schedule;
}

impl Record for ResultItem {
    const TABLE: Table = Table::Results;
}

impl Record for EventItem {
    const TABLE: Table = Table::Events;
}
