use crate::errors::Result;
use crate::schema::{ResultItem, Table};
use crate::storage::{self, Order, Predicate, Value};
use sqlx::PgPool;
use tracing::{debug, instrument, trace};

/// Keyed store for task results.
///
/// Writes are append-only: putting a key twice leaves two rows, and reads
/// return the most recent one. [`ResultChannel::delete`] clears every row for
/// a key, including stale duplicates left by retried tasks.
#[derive(Debug, Clone)]
pub struct ResultChannel {
    pool: PgPool,
}

impl ResultChannel {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store `value` under `key` and return the new row's id.
    #[instrument(name = "storage.results.put", skip(self, value))]
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<i64> {
        let id = storage::insert(
            &self.pool,
            Table::Results,
            &[("key", Value::Text(key)), ("result", Value::Bytes(value))],
        )
        .await?;
        trace!(id, "Stored result");
        Ok(id)
    }

    /// The most recent value stored under `key`, if any.
    #[instrument(name = "storage.results.get", skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.latest(key).await?.map(|item| item.value))
    }

    /// Same lookup as [`ResultChannel::get`]; never removes anything.
    ///
    /// Whether reading a result consumes it is the caller's decision: follow
    /// `peek` with `delete`, or use [`ResultChannel::pop`].
    #[instrument(name = "storage.results.peek", skip(self))]
    pub async fn peek(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get(key).await
    }

    /// The full row holding the most recent value for `key`.
    pub async fn latest(&self, key: &str) -> Result<Option<ResultItem>> {
        let item = storage::fetch_range::<ResultItem>(
            &self.pool,
            &[Predicate::Eq("key", Value::Text(key))],
            Order::IdDesc,
            Some(1),
        )
        .await?
        .into_iter()
        .next();
        Ok(item)
    }

    /// Atomically remove every row for `key` and return the most recent value.
    ///
    /// When two callers pop the same key at once, only one receives the value.
    #[instrument(name = "storage.results.pop", skip(self))]
    pub async fn pop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let rows = storage::take_range::<ResultItem>(
            &self.pool,
            &[Predicate::Eq("key", Value::Text(key))],
            Order::IdDesc,
            None,
        )
        .await?;

        if rows.len() > 1 {
            debug!(duplicates = rows.len() - 1, "Dropped stale results");
        }
        Ok(rows.into_iter().next().map(|item| item.value))
    }

    /// Whether any value is stored under `key`.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        let count = storage::count(
            &self.pool,
            Table::Results,
            &[Predicate::Eq("key", Value::Text(key))],
        )
        .await?;
        Ok(count > 0)
    }

    /// Remove every row for `key` and return how many were removed.
    ///
    /// Deleting a key that does not exist is not an error.
    #[instrument(name = "storage.results.delete", skip(self))]
    pub async fn delete(&self, key: &str) -> Result<u64> {
        let removed = storage::delete_where(
            &self.pool,
            Table::Results,
            &[Predicate::Eq("key", Value::Text(key))],
        )
        .await?;
        trace!(removed, "Deleted results");
        Ok(removed)
    }

    /// Number of stored result rows, duplicates included.
    pub async fn len(&self) -> Result<i64> {
        storage::count(&self.pool, Table::Results, &[]).await
    }

    /// Whether no results are stored.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Delete every stored result.
    #[instrument(name = "storage.results.flush", skip(self))]
    pub async fn flush(&self) -> Result<u64> {
        let removed = storage::flush(&self.pool, Table::Results).await?;
        debug!(removed, "Flushed results");
        Ok(removed)
    }
}
