#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod backend;
mod config;
mod errors;
mod events;
mod queue;
mod results;
mod schedule;
/// Database schema definitions.
pub mod schema;
mod setup;
mod storage;

/// Handle composing the four channels over one connection pool.
pub use self::backend::Storage;
/// Connection and pool settings.
pub use self::config::StorageConfig;
/// Error and result types for storage operations.
pub use self::errors::{Result, StorageError};
/// The channel-based event log.
pub use self::events::EventChannel;
/// The FIFO work queue.
pub use self::queue::QueueChannel;
/// The keyed result store.
pub use self::results::ResultChannel;
/// The deferred-execution schedule.
pub use self::schedule::ScheduleChannel;
pub use self::schema::{EventItem, QueueItem, ResultItem, ScheduleItem, Table};
/// Creating and dropping the backend's tables.
pub use self::setup::{setup_database, teardown_database};
