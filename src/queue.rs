use crate::errors::Result;
use crate::schema::{QueueItem, Table};
use crate::storage::{self, Order, Value};
use sqlx::PgPool;
use tracing::{debug, instrument, trace};

/// Maximum rows per `INSERT` statement, keeping batches under the bind limit.
const MAX_BATCH_ROWS: usize = 10_000;

/// FIFO work queue.
///
/// Items are delivered in enqueue order. [`QueueChannel::dequeue`] removes the
/// item in the same statement that selects it, so concurrent consumers, even
/// in separate processes, never receive the same item.
#[derive(Debug, Clone)]
pub struct QueueChannel {
    pool: PgPool,
}

impl QueueChannel {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an item to the tail of the queue and return its id.
    #[instrument(name = "storage.queue.enqueue", skip_all, fields(len = payload.len()))]
    pub async fn enqueue(&self, payload: &[u8]) -> Result<i64> {
        let id = storage::insert(&self.pool, Table::Queue, &[("item", Value::Bytes(payload))])
            .await?;
        trace!(id, "Enqueued item");
        Ok(id)
    }

    /// Append several items in one transaction.
    ///
    /// Returns the ids in input order. Either every item is enqueued or none is.
    #[instrument(name = "storage.queue.enqueue_batch", skip_all, fields(count = payloads.len()))]
    pub async fn enqueue_batch<P: AsRef<[u8]>>(&self, payloads: &[P]) -> Result<Vec<i64>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(payloads.len());
        for chunk in payloads.chunks(MAX_BATCH_ROWS) {
            let values: Vec<[Value<'_>; 1]> = chunk
                .iter()
                .map(|payload| [Value::Bytes(payload.as_ref())])
                .collect();
            let rows: Vec<&[Value<'_>]> = values.iter().map(|row| row.as_slice()).collect();
            ids.extend(storage::insert_many(&mut *tx, Table::Queue, &["item"], &rows).await?);
        }
        tx.commit().await?;

        debug!(count = ids.len(), "Enqueued batch");
        Ok(ids)
    }

    /// Remove and return the oldest item, or `None` if the queue is empty.
    ///
    /// Never blocks waiting for an item; polling with backoff is up to the caller.
    #[instrument(name = "storage.queue.dequeue", skip_all)]
    pub async fn dequeue(&self) -> Result<Option<QueueItem>> {
        let item = storage::take_range::<QueueItem>(&self.pool, &[], Order::IdAsc, Some(1))
            .await?
            .into_iter()
            .next();

        match &item {
            Some(item) => debug!(id = item.id, "Dequeued item"),
            None => trace!("Queue is empty"),
        }
        Ok(item)
    }

    /// Return up to `limit` items from the head of the queue without removing them.
    #[instrument(name = "storage.queue.peek", skip(self))]
    pub async fn peek(&self, limit: i64) -> Result<Vec<QueueItem>> {
        storage::fetch_range(&self.pool, &[], Order::IdAsc, Some(limit)).await
    }

    /// Remove a specific item, e.g. a revoked task. Returns whether it was still queued.
    #[instrument(name = "storage.queue.remove", skip(self))]
    pub async fn remove(&self, id: i64) -> Result<bool> {
        storage::delete(&self.pool, Table::Queue, id).await
    }

    /// Number of items waiting in the queue.
    pub async fn len(&self) -> Result<i64> {
        storage::count(&self.pool, Table::Queue, &[]).await
    }

    /// Whether the queue has no items.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Delete every item. Meant for resets, not for normal operation.
    #[instrument(name = "storage.queue.flush", skip(self))]
    pub async fn flush(&self) -> Result<u64> {
        let removed = storage::flush(&self.pool, Table::Queue).await?;
        debug!(removed, "Flushed queue");
        Ok(removed)
    }
}
