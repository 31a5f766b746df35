//! Forward-only migration runner.

use crm_storage::MigrationOutcome;
use sqlx::migrate::{Migrate, MigrateError, Migrator};
use sqlx::{Database, Pool};
use std::collections::HashSet;
use std::path::Path;

/// Load a migration set from a directory of `<version>_<description>.sql` files.
pub async fn load_migrations(path: &Path) -> Result<Migrator, MigrateError> {
    Migrator::new(path.to_path_buf()).await
}

/// Apply every pending migration in `source` to `pool`.
///
/// Returns [`MigrationOutcome::UpToDate`] when nothing was pending. A failure leaves the
/// database at the last successfully applied version.
pub async fn migrate<DB>(
    pool: &Pool<DB>,
    source: &Migrator,
    db_name: &str,
) -> Result<MigrationOutcome, MigrateError>
where
    DB: Database,
    DB::Connection: Migrate,
{
    let pending = {
        let mut conn = pool.acquire().await?;
        conn.ensure_migrations_table().await?;
        let applied: HashSet<i64> = conn
            .list_applied_migrations()
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();
        source
            .iter()
            .filter(|m| !m.migration_type.is_down_migration() && !applied.contains(&m.version))
            .count()
    };

    if pending == 0 {
        tracing::debug!(db_name, "database schema already at head");
        return Ok(MigrationOutcome::UpToDate);
    }

    tracing::info!(db_name, pending, "applying migrations");
    source.run(pool).await.map_err(|err| {
        tracing::error!(db_name, error = %err, "migration failed");
        err
    })?;
    tracing::info!(db_name, applied = pending, "migrations applied");

    Ok(MigrationOutcome::Applied(pending))
}
