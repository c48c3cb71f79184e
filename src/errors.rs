use thiserror::Error;

/// SQLSTATE raised by PostgreSQL when a relation does not exist.
const UNDEFINED_TABLE: &str = "42P01";

/// Errors returned by the storage backend.
///
/// An absent row is never an error: lookups return `None` or an empty `Vec`
/// so that polling callers can tell "empty" apart from "broken".
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached, or the connection was lost mid-call.
    ///
    /// Never retried internally; retry policy belongs to the caller.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),

    /// A table the backend depends on does not exist. Holds the table name.
    #[error("required table is missing: {0}")]
    SchemaMissing(String),

    /// Any other error reported by the database.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Applying or reverting the bundled migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The configuration is not usable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether this error means the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.code().as_deref() == Some(UNDEFINED_TABLE) {
                return Self::SchemaMissing(missing_relation(db_error.message()).to_string());
            }
        }

        if indicates_unavailable(&error) {
            Self::StorageUnavailable(error)
        } else {
            Self::Database(error)
        }
    }
}

/// The relation named by an undefined-table message such as
/// `relation "task_queue" does not exist`, or the whole message if it has no
/// quoted name.
fn missing_relation(message: &str) -> &str {
    message
        .split_once('"')
        .and_then(|(_, rest)| rest.split_once('"'))
        .map_or(message, |(name, _)| name)
}

fn indicates_unavailable(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_error) => db_error
            .code()
            .is_some_and(|code| is_connection_failure(&code)),
        _ => false,
    }
}

/// Class 08 is "connection exception", 57P01-57P03 are server shutdown states.
fn is_connection_failure(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

/// Result type for storage operations.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_mean_unavailable() {
        assert!(StorageError::from(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(StorageError::from(sqlx::Error::PoolClosed).is_unavailable());
        assert!(StorageError::from(sqlx::Error::WorkerCrashed).is_unavailable());
    }

    #[test]
    fn io_errors_mean_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(StorageError::from(sqlx::Error::Io(io)).is_unavailable());
    }

    #[test]
    fn other_errors_are_database_errors() {
        let error = StorageError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, StorageError::Database(_)));
        assert!(!error.is_unavailable());
    }

    #[test]
    fn missing_relation_is_the_bare_table_name() {
        assert_eq!(
            missing_relation(r#"relation "task_queue" does not exist"#),
            "task_queue"
        );
        assert_eq!(
            missing_relation(r#"relation "public.task_events" does not exist"#),
            "public.task_events"
        );
        assert_eq!(missing_relation("no such table"), "no such table");
    }

    #[test]
    fn connection_failure_codes() {
        assert!(is_connection_failure("08006"));
        assert!(is_connection_failure("08001"));
        assert!(is_connection_failure("57P01"));
        assert!(!is_connection_failure("23505"));
        assert!(!is_connection_failure(UNDEFINED_TABLE));
    }
}
