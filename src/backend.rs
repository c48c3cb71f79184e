use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::events::EventChannel;
use crate::queue::QueueChannel;
use crate::results::ResultChannel;
use crate::schedule::ScheduleChannel;
use crate::schema::Table;
use crate::storage;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

/// Handle to the storage backend.
///
/// Owns the connection pool and hands out the four channels. Cloning is
/// cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: PgPool,
    queue: QueueChannel,
    schedule: ScheduleChannel,
    results: ResultChannel,
    events: EventChannel,
}

impl Storage {
    /// Connect using `config` and open the backend.
    ///
    /// Unless disabled with [`StorageConfig::verify_schema`], fails with
    /// [`StorageError::SchemaMissing`] when a table does not exist.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let pool = config.connect_pool().await?;
        if config.verify_schema {
            if let Err(error) = verify_schema(&pool).await {
                pool.close().await;
                return Err(error);
            }
        }
        Ok(Self::with_pool(pool))
    }

    /// Open the backend on an existing pool, checking that every table exists.
    pub async fn open(pool: PgPool) -> Result<Self> {
        verify_schema(&pool).await?;
        Ok(Self::with_pool(pool))
    }

    fn with_pool(pool: PgPool) -> Self {
        info!("Storage backend opened");
        Self {
            queue: QueueChannel::new(pool.clone()),
            schedule: ScheduleChannel::new(pool.clone()),
            results: ResultChannel::new(pool.clone()),
            events: EventChannel::new(pool.clone()),
            pool,
        }
    }

    /// The FIFO work queue.
    pub fn queue(&self) -> &QueueChannel {
        &self.queue
    }

    /// The deferred-execution schedule.
    pub fn schedule(&self) -> &ScheduleChannel {
        &self.schedule
    }

    /// The keyed result store.
    pub fn results(&self) -> &ResultChannel {
        &self.results
    }

    /// The channel-based event log.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Empty the queue, the schedule and the result store.
    ///
    /// Events are left untouched; their retention is managed outside the backend.
    #[instrument(name = "storage.flush_all", skip(self))]
    pub async fn flush_all(&self) -> Result<()> {
        self.queue.flush().await?;
        self.schedule.flush().await?;
        self.results.flush().await?;
        Ok(())
    }

    /// Close every pooled connection, waiting for checked-out ones to be returned.
    pub async fn close(self) {
        self.pool.close().await;
        info!("Storage backend closed");
    }
}

/// Check that every table the backend needs exists.
#[instrument(skip_all)]
pub(crate) async fn verify_schema(pool: &PgPool) -> Result<()> {
    for table in Table::ALL {
        if !storage::table_exists(pool, table).await? {
            warn!(%table, "Required table is missing");
            return Err(StorageError::SchemaMissing(table.name().to_string()));
        }
    }
    Ok(())
}
