use crate::errors::Result;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create the backend's tables and indexes.
///
/// Applies the bundled migrations; already-applied ones are skipped, so this
/// is safe to call on every start-up.
pub async fn setup_database(pool: &PgPool) -> Result<()> {
    info!("Applying storage migrations…");
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// Drop the backend's tables, reverting every bundled migration.
///
/// All queued, scheduled, result and event rows are lost.
pub async fn teardown_database(pool: &PgPool) -> Result<()> {
    info!("Reverting storage migrations…");
    MIGRATOR.undo(pool, 0).await?;
    Ok(())
}
