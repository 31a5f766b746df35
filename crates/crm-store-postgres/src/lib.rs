//! Postgres implementation of the CRM store.
//!
//! One server hosts the directory database and every tenant database. Tenant databases are
//! created with `CREATE DATABASE` after a `pg_database` catalog lookup.

use crm_db::{ConnectionRegistry, PoolPolicy};
use crm_storage::{
    AuthUser, AuthUserId, Capabilities, Company, CompanyId, DatabaseCreation, DatabaseName,
    DirectoryTxn, MigrationOutcome, NewAuthUser, NewCompany, NewTenantUser, RightId, Store,
    StoreError, TenantTxn, TenantUserId,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;
use zeroize::Zeroizing;

static DIRECTORY_MIGRATOR: Migrator = sqlx::migrate!("./migrations/directory");

/// Registry key of the directory database. Not a valid [`DatabaseName`], so it never
/// collides with a tenant.
const DIRECTORY_KEY: &str = "_directory";

/// SQLSTATE `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";

/// Tenant migration set shipped with this crate.
pub fn bundled_tenant_migrations() -> Migrator {
    sqlx::migrate!("./migrations/tenant")
}

/// Server coordinates; the same credentials reach the directory and every tenant.
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Zeroizing<String>,
    pub directory_db: String,
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("directory_db", &self.directory_db)
            .finish()
    }
}

impl PostgresConfig {
    fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
    }
}

pub struct PostgresStore {
    registry: ConnectionRegistry<Postgres>,
    tenant_migrations: Migrator,
}

impl PostgresStore {
    /// Connect to the directory database and bring it to head.
    pub async fn open(
        config: PostgresConfig,
        tenant_migrations: Migrator,
    ) -> Result<Self, StoreError> {
        let directory_db = config.directory_db.clone();
        let registry = ConnectionRegistry::new(PoolPolicy::default(), move |name| {
            if name == DIRECTORY_KEY {
                config.connect_options(&config.directory_db)
            } else {
                config.connect_options(name)
            }
        });

        let directory = registry.get(DIRECTORY_KEY).await;
        crm_db::migrate(&directory, &DIRECTORY_MIGRATOR, &directory_db)
            .await
            .map_err(StoreError::backend)?;

        tracing::info!(directory_db, "opened postgres store");
        Ok(Self {
            registry,
            tenant_migrations,
        })
    }

    async fn directory(&self) -> PgPool {
        self.registry.get(DIRECTORY_KEY).await
    }

    async fn tenant(&self, db_name: &DatabaseName) -> PgPool {
        self.registry.get(db_name.as_str()).await
    }
}

/// Classify by constraint kind reported by Postgres.
fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::AlreadyExists;
        }
        if db.is_foreign_key_violation() {
            return StoreError::MissingReference;
        }
    }
    StoreError::backend(err)
}

fn parse_db_name(name: &str) -> Result<DatabaseName, StoreError> {
    DatabaseName::parse(name).map_err(StoreError::backend)
}

type AuthUserRow = (Uuid, String, Option<String>, String, Uuid);

fn auth_user_from_row((id, email, phone, password_hash, company_id): AuthUserRow) -> AuthUser {
    AuthUser {
        id: AuthUserId(id),
        email,
        phone,
        password_hash,
        company_id: CompanyId(company_id),
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    // ─────────────────────────────── Lifecycle ───────────────────────────────

    async fn create_database(
        &self,
        db_name: &DatabaseName,
    ) -> Result<DatabaseCreation, StoreError> {
        let directory = self.directory().await;

        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(db_name.as_str())
                .fetch_one(&directory)
                .await
                .map_err(map_err)?;
        if exists {
            tracing::debug!(db_name = %db_name, "tenant database already present");
            return Ok(DatabaseCreation::AlreadyPresent);
        }

        // DatabaseName only admits ASCII letters, so quoting is sufficient.
        let ddl = format!("CREATE DATABASE \"{}\"", db_name.as_str());
        // Plain string executes over the simple protocol, outside any transaction block.
        match directory.execute(ddl.as_str()).await {
            Ok(_) => {
                tracing::info!(db_name = %db_name, "created tenant database");
                Ok(DatabaseCreation::Created)
            }
            // Lost a race with a concurrent creator.
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(DUPLICATE_DATABASE) || db.is_unique_violation() =>
            {
                Ok(DatabaseCreation::AlreadyPresent)
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn migrate_tenant(&self, db_name: &DatabaseName) -> Result<MigrationOutcome, StoreError> {
        let pool = self.tenant(db_name).await;
        crm_db::migrate(&pool, &self.tenant_migrations, db_name.as_str())
            .await
            .map_err(StoreError::backend)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.registry.close_all().await.map_err(StoreError::backend)
    }

    // ─────────────────────────────── Transactions ───────────────────────────────

    async fn begin_directory(&self) -> Result<Box<dyn DirectoryTxn>, StoreError> {
        let tx = self.directory().await.begin().await.map_err(map_err)?;
        Ok(Box::new(PgDirectoryTxn { tx }))
    }

    async fn begin_tenant(&self, db_name: &DatabaseName) -> Result<Box<dyn TenantTxn>, StoreError> {
        let tx = self.tenant(db_name).await.begin().await.map_err(map_err)?;
        Ok(Box::new(PgTenantTxn { tx }))
    }

    // ─────────────────────────────── Reads ───────────────────────────────

    async fn find_auth_users(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<AuthUser>, StoreError> {
        if email.is_none() && phone.is_none() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, AuthUserRow>(
            "SELECT id, email, phone, password, company_id FROM auth_users
             WHERE email = $1 OR phone = $2
             ORDER BY created_at, id",
        )
        .bind(email)
        .bind(phone)
        .fetch_all(&self.directory().await)
        .await
        .map_err(map_err)?;

        Ok(rows.into_iter().map(auth_user_from_row).collect())
    }

    async fn company_database(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<DatabaseName>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT db_name FROM companies WHERE id = $1")
            .bind(company_id.0)
            .fetch_optional(&self.directory().await)
            .await
            .map_err(map_err)?;

        row.map(|(name,)| parse_db_name(&name)).transpose()
    }

    async fn find_tenant_user(
        &self,
        db_name: &DatabaseName,
        auth_id: &AuthUserId,
    ) -> Result<Option<TenantUserId>, StoreError> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE auth_id = $1")
            .bind(auth_id.0)
            .fetch_optional(&self.tenant(db_name).await)
            .await
            .map_err(map_err)?;

        Ok(row.map(|(id,)| TenantUserId(id)))
    }
}

pub struct PgDirectoryTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl DirectoryTxn for PgDirectoryTxn {
    async fn find_company(
        &mut self,
        name: &str,
        address: &str,
    ) -> Result<Option<CompanyId>, StoreError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM companies WHERE name = $1 AND address = $2")
                .bind(name)
                .bind(address)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_err)?;

        Ok(row.map(|(id,)| CompanyId(id)))
    }

    async fn get_company(&mut self, company_id: &CompanyId) -> Result<Company, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String)>(
            "SELECT id, name, address, db_name FROM companies WHERE id = $1",
        )
        .bind(company_id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;

        let (id, name, address, db_name) = row.ok_or(StoreError::NotFound)?;
        Ok(Company {
            id: CompanyId(id),
            name,
            address,
            db_name: parse_db_name(&db_name)?,
        })
    }

    async fn insert_company(&mut self, params: &NewCompany) -> Result<CompanyId, StoreError> {
        let id = CompanyId::generate();
        sqlx::query("INSERT INTO companies(id, name, address, db_name) VALUES($1, $2, $3, $4)")
            .bind(id.0)
            .bind(&params.name)
            .bind(&params.address)
            .bind(params.db_name.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(id)
    }

    async fn insert_auth_user(&mut self, params: &NewAuthUser) -> Result<AuthUserId, StoreError> {
        let id = AuthUserId::generate();
        sqlx::query(
            "INSERT INTO auth_users(id, email, phone, password, company_id)
             VALUES($1, $2, $3, $4, $5)",
        )
        .bind(id.0)
        .bind(&params.email)
        .bind(params.phone.as_deref())
        .bind(&params.password_hash)
        .bind(params.company_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(id)
    }

    async fn find_auth_user(
        &mut self,
        email: &str,
        phone: Option<&str>,
    ) -> Result<Option<AuthUser>, StoreError> {
        let row = sqlx::query_as::<_, AuthUserRow>(
            "SELECT id, email, phone, password, company_id FROM auth_users
             WHERE email = $1 OR phone = $2
             ORDER BY (email = $1) DESC
             LIMIT 1",
        )
        .bind(email)
        .bind(phone)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;

        Ok(row.map(auth_user_from_row))
    }

    async fn delete_auth_user(&mut self, auth_id: &AuthUserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_users WHERE id = $1")
            .bind(auth_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete_company(&mut self, company_id: &CompanyId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM companies WHERE id = $1")
            .bind(company_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_err)
    }
}

pub struct PgTenantTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl TenantTxn for PgTenantTxn {
    async fn insert_right(&mut self, role: &str) -> Result<RightId, StoreError> {
        let id = RightId::generate();
        sqlx::query("INSERT INTO rights(id, role) VALUES($1, $2)")
            .bind(id.0)
            .bind(role)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(id)
    }

    async fn insert_user(&mut self, params: &NewTenantUser) -> Result<TenantUserId, StoreError> {
        let id = TenantUserId::generate();
        sqlx::query(
            "INSERT INTO users(id, company_id, rights_id, auth_id) VALUES($1, $2, $3, $4)",
        )
        .bind(id.0)
        .bind(params.company_id.0)
        .bind(params.rights_id.0)
        .bind(params.auth_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(id)
    }

    async fn find_user(
        &mut self,
        auth_id: &AuthUserId,
        company_id: &CompanyId,
    ) -> Result<Option<TenantUserId>, StoreError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE auth_id = $1 AND company_id = $2")
                .bind(auth_id.0)
                .bind(company_id.0)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_err)?;

        Ok(row.map(|(id,)| TenantUserId(id)))
    }

    async fn insert_available_actions(
        &mut self,
        role_id: &RightId,
        capabilities: Capabilities,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO available_actions(role_id, create_tasks, create_chats, add_workers)
             VALUES($1, $2, $3, $4)",
        )
        .bind(role_id.0)
        .bind(capabilities.create_tasks)
        .bind(capabilities.create_chats)
        .bind(capabilities.add_workers)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_err)
    }
}
