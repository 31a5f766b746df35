use std::sync::Arc;

use crm_storage::*;
use crm_store_postgres::PostgresStore;
use crm_store_sqlite::SqliteStore;
use sqlx::migrate::Migrator;

use crate::config::{BackendConfig, ServerConfig};

/// StoreBackend abstracts over SQLite and PostgreSQL implementations
#[derive(Clone)]
pub enum StoreBackend {
    Sqlite(Arc<SqliteStore>),
    Postgres(Arc<PostgresStore>),
}

impl StoreBackend {
    /// Open the configured backend and migrate its directory database.
    pub async fn open(config: &ServerConfig) -> Result<Self, StoreError> {
        match &config.backend {
            BackendConfig::Postgres(pg) => {
                let tenant =
                    tenant_migrations(config, crm_store_postgres::bundled_tenant_migrations)
                        .await?;
                let store = PostgresStore::open(pg.clone(), tenant).await?;
                Ok(StoreBackend::Postgres(Arc::new(store)))
            }
            BackendConfig::Sqlite { data_dir } => {
                let tenant =
                    tenant_migrations(config, crm_store_sqlite::bundled_tenant_migrations).await?;
                let store = SqliteStore::open(data_dir.clone(), tenant).await?;
                Ok(StoreBackend::Sqlite(Arc::new(store)))
            }
        }
    }
}

async fn tenant_migrations(
    config: &ServerConfig,
    bundled: fn() -> Migrator,
) -> Result<Migrator, StoreError> {
    match &config.tenant_migrations {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading tenant migrations");
            crm_db::load_migrations(path)
                .await
                .map_err(StoreError::backend)
        }
        None => Ok(bundled()),
    }
}

#[async_trait::async_trait]
impl Store for StoreBackend {
    async fn create_database(
        &self,
        db_name: &DatabaseName,
    ) -> Result<DatabaseCreation, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.create_database(db_name).await,
            StoreBackend::Postgres(s) => s.create_database(db_name).await,
        }
    }

    async fn migrate_tenant(&self, db_name: &DatabaseName) -> Result<MigrationOutcome, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.migrate_tenant(db_name).await,
            StoreBackend::Postgres(s) => s.migrate_tenant(db_name).await,
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.close().await,
            StoreBackend::Postgres(s) => s.close().await,
        }
    }

    async fn begin_directory(&self) -> Result<Box<dyn DirectoryTxn>, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.begin_directory().await,
            StoreBackend::Postgres(s) => s.begin_directory().await,
        }
    }

    async fn begin_tenant(&self, db_name: &DatabaseName) -> Result<Box<dyn TenantTxn>, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.begin_tenant(db_name).await,
            StoreBackend::Postgres(s) => s.begin_tenant(db_name).await,
        }
    }

    async fn find_auth_users(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<AuthUser>, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.find_auth_users(email, phone).await,
            StoreBackend::Postgres(s) => s.find_auth_users(email, phone).await,
        }
    }

    async fn company_database(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<DatabaseName>, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.company_database(company_id).await,
            StoreBackend::Postgres(s) => s.company_database(company_id).await,
        }
    }

    async fn find_tenant_user(
        &self,
        db_name: &DatabaseName,
        auth_id: &AuthUserId,
    ) -> Result<Option<TenantUserId>, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.find_tenant_user(db_name, auth_id).await,
            StoreBackend::Postgres(s) => s.find_tenant_user(db_name, auth_id).await,
        }
    }
}
