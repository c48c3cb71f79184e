use crate::errors::Result;
use crate::schema::{ScheduleItem, Table};
use crate::storage::{self, Order, Predicate, Value};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, instrument, trace};

/// Items deferred until a point in time.
///
/// Due times are Unix timestamps in seconds. Items with equal due times come
/// out in the order they were scheduled.
#[derive(Debug, Clone)]
pub struct ScheduleChannel {
    pool: PgPool,
}

impl ScheduleChannel {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Schedule an item to become ready at `due_at` and return its id.
    #[instrument(name = "storage.schedule.schedule", skip(self, payload))]
    pub async fn schedule(&self, payload: &[u8], due_at: i64) -> Result<i64> {
        let id = storage::insert(
            &self.pool,
            Table::Schedule,
            &[("item", Value::Bytes(payload)), ("ts", Value::Int(due_at))],
        )
        .await?;
        trace!(id, "Scheduled item");
        Ok(id)
    }

    /// Schedule an item to become ready at `due_at`, truncated to whole seconds.
    pub async fn schedule_at(&self, payload: &[u8], due_at: DateTime<Utc>) -> Result<i64> {
        self.schedule(payload, due_at.timestamp()).await
    }

    /// Remove and return every item due at or before `now`, ordered by due time then id.
    ///
    /// The batch is taken by a single statement, so it is removed as a whole or
    /// not at all. Items already taken by a concurrent caller are skipped, so
    /// each item is handed out at most once. Moving the items onto the queue
    /// is left to the caller; see [`ScheduleChannel::pop_ready_in`] to do both
    /// in one transaction.
    #[instrument(name = "storage.schedule.pop_ready", skip(self))]
    pub async fn pop_ready(&self, now: i64) -> Result<Vec<ScheduleItem>> {
        let mut conn = self.pool.acquire().await?;
        take_due(&mut conn, now, None).await
    }

    /// Like [`ScheduleChannel::pop_ready`], but takes at most `limit` of the earliest items.
    #[instrument(name = "storage.schedule.pop_ready_limited", skip(self))]
    pub async fn pop_ready_limited(&self, now: i64, limit: i64) -> Result<Vec<ScheduleItem>> {
        let mut conn = self.pool.acquire().await?;
        take_due(&mut conn, now, Some(limit)).await
    }

    /// [`ScheduleChannel::pop_ready`] inside the caller's transaction.
    ///
    /// The items stay locked until `tx` ends. Rolling back puts every one of
    /// them back; concurrent pops skip them in the meantime.
    #[instrument(name = "storage.schedule.pop_ready_in", skip(self, tx))]
    pub async fn pop_ready_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        now: i64,
    ) -> Result<Vec<ScheduleItem>> {
        take_due(tx, now, None).await
    }

    /// [`ScheduleChannel::pop_ready`] against the current wall-clock time.
    pub async fn pop_due(&self) -> Result<Vec<ScheduleItem>> {
        self.pop_ready(Utc::now().timestamp()).await
    }

    /// Return up to `limit` scheduled items, soonest first, without removing them.
    #[instrument(name = "storage.schedule.list", skip(self))]
    pub async fn list(&self, limit: i64) -> Result<Vec<ScheduleItem>> {
        storage::fetch_range(&self.pool, &[], Order::DueAsc, Some(limit)).await
    }

    /// Cancel a scheduled item. Returns whether it was still pending.
    #[instrument(name = "storage.schedule.cancel", skip(self))]
    pub async fn cancel(&self, id: i64) -> Result<bool> {
        storage::delete(&self.pool, Table::Schedule, id).await
    }

    /// Number of scheduled items, due or not.
    pub async fn len(&self) -> Result<i64> {
        storage::count(&self.pool, Table::Schedule, &[]).await
    }

    /// Whether nothing is scheduled.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Delete every scheduled item.
    #[instrument(name = "storage.schedule.flush", skip(self))]
    pub async fn flush(&self) -> Result<u64> {
        let removed = storage::flush(&self.pool, Table::Schedule).await?;
        debug!(removed, "Flushed schedule");
        Ok(removed)
    }
}

async fn take_due(
    conn: &mut PgConnection,
    now: i64,
    limit: Option<i64>,
) -> Result<Vec<ScheduleItem>> {
    let items = storage::take_range::<ScheduleItem>(
        conn,
        &[Predicate::Le("ts", Value::Int(now))],
        Order::DueAsc,
        limit,
    )
    .await?;

    if items.is_empty() {
        trace!("No scheduled items are due");
    } else {
        debug!(count = items.len(), "Popped due items");
    }
    Ok(items)
}
