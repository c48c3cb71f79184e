use crate::errors::Result;
use crate::schema::{EventItem, Table};
use crate::storage::{self, Order, Predicate, Value};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{instrument, trace};

/// Append-only event log, partitioned by channel name.
///
/// The backend keeps no subscriber state. A subscriber remembers the id of
/// the last message it handled and passes it back as the cursor of its next
/// [`EventChannel::read_since`] call.
///
/// Publishers are serialized until commit, so messages become visible in id
/// order and a cursor never moves past a message that is still in flight.
#[derive(Debug, Clone)]
pub struct EventChannel {
    pool: PgPool,
}

impl EventChannel {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a message to `channel` and return its id.
    ///
    /// Waits while another publisher holds an uncommitted message.
    #[instrument(name = "storage.events.publish", skip(self, message))]
    pub async fn publish(&self, channel: &str, message: &[u8]) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = append(&mut tx, channel, message).await?;
        tx.commit().await?;

        trace!(id, "Published event");
        Ok(id)
    }

    /// Append a message as part of the caller's transaction.
    ///
    /// The message becomes visible when `tx` commits and is dropped if it rolls
    /// back. Other publishers wait until then, so keep the transaction short.
    #[instrument(name = "storage.events.publish_in", skip(self, tx, message))]
    pub async fn publish_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        channel: &str,
        message: &[u8],
    ) -> Result<i64> {
        let id = append(tx, channel, message).await?;
        trace!(id, "Published event, pending commit");
        Ok(id)
    }

    /// Every message on `channel` with an id greater than `after_id`, oldest first.
    ///
    /// Pass `0` to read the channel from the beginning.
    #[instrument(name = "storage.events.read_since", skip(self))]
    pub async fn read_since(&self, channel: &str, after_id: i64) -> Result<Vec<EventItem>> {
        self.read(channel, after_id, None).await
    }

    /// Like [`EventChannel::read_since`], returning at most `limit` messages.
    #[instrument(name = "storage.events.read_since_limited", skip(self))]
    pub async fn read_since_limited(
        &self,
        channel: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<EventItem>> {
        self.read(channel, after_id, Some(limit)).await
    }

    async fn read(
        &self,
        channel: &str,
        after_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<EventItem>> {
        storage::fetch_range(
            &self.pool,
            &[
                Predicate::Eq("channel", Value::Text(channel)),
                Predicate::Gt("id", Value::Int(after_id)),
            ],
            Order::IdAsc,
            limit,
        )
        .await
    }

    /// Id of the newest message on `channel`.
    ///
    /// A new subscriber that only wants future messages starts from this cursor.
    pub async fn latest_id(&self, channel: &str) -> Result<Option<i64>> {
        let latest = storage::fetch_range::<EventItem>(
            &self.pool,
            &[Predicate::Eq("channel", Value::Text(channel))],
            Order::IdDesc,
            Some(1),
        )
        .await?
        .into_iter()
        .next()
        .map(|event| event.id);
        Ok(latest)
    }

    /// Number of messages stored for `channel`.
    pub async fn len(&self, channel: &str) -> Result<i64> {
        storage::count(
            &self.pool,
            Table::Events,
            &[Predicate::Eq("channel", Value::Text(channel))],
        )
        .await
    }
}

async fn append(conn: &mut PgConnection, channel: &str, message: &[u8]) -> Result<i64> {
    storage::lock_appends(&mut *conn, Table::Events).await?;
    storage::insert(
        &mut *conn,
        Table::Events,
        &[
            ("channel", Value::Text(channel)),
            ("message", Value::Bytes(message)),
        ],
    )
    .await
}
