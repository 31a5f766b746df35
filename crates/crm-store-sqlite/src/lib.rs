//! SQLite implementation of the CRM store.
//!
//! One data directory holds the directory database (`directory.db`) and one file per tenant
//! under `tenants/`. A tenant database "exists" exactly when its file exists.

use chrono::Utc;
use crm_db::{ConnectionRegistry, PoolPolicy};
use crm_storage::{
    AuthUser, AuthUserId, Capabilities, Company, CompanyId, DatabaseCreation, DatabaseName,
    DirectoryTxn, MigrationOutcome, NewAuthUser, NewCompany, NewTenantUser, RightId, Store,
    StoreError, TenantTxn, TenantUserId,
};
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

static DIRECTORY_MIGRATOR: Migrator = sqlx::migrate!("./migrations/directory");

/// Registry key of the directory database. Not a valid [`DatabaseName`], so it never
/// collides with a tenant.
const DIRECTORY_KEY: &str = "_directory";
const TENANT_DIR: &str = "tenants";

/// How long a writer waits for another connection's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Write transactions take the database write lock up front. A deferred transaction that
/// reads and then writes fails with SQLITE_BUSY when another writer got there first.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// Tenant migration set shipped with this crate.
pub fn bundled_tenant_migrations() -> Migrator {
    sqlx::migrate!("./migrations/tenant")
}

pub struct SqliteStore {
    data_dir: PathBuf,
    registry: ConnectionRegistry<Sqlite>,
    tenant_migrations: Migrator,
}

impl SqliteStore {
    /// Open (or initialise) a store rooted at `data_dir` and migrate the directory database.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        tenant_migrations: Migrator,
    ) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(data_dir.join(TENANT_DIR))
            .await
            .map_err(StoreError::backend)?;

        let root = data_dir.clone();
        let registry = ConnectionRegistry::new(PoolPolicy::default(), move |name| {
            connect_options(&root, name)
        });

        let directory = registry.get(DIRECTORY_KEY).await;
        crm_db::migrate(&directory, &DIRECTORY_MIGRATOR, "directory")
            .await
            .map_err(StoreError::backend)?;

        tracing::info!(data_dir = %data_dir.display(), "opened sqlite store");
        Ok(Self {
            data_dir,
            registry,
            tenant_migrations,
        })
    }

    /// File backing a tenant database.
    pub fn tenant_path(&self, db_name: &DatabaseName) -> PathBuf {
        tenant_path(&self.data_dir, db_name.as_str())
    }

    /// Row count of a directory table. Diagnostics only.
    pub async fn directory_row_count(&self, table: &str) -> Result<i64, StoreError> {
        let table = checked_table(table, &["companies", "auth_users"])?;
        let pool = self.directory().await;
        count_rows(&pool, table).await
    }

    /// Row count of a tenant table. Diagnostics only.
    pub async fn tenant_row_count(
        &self,
        db_name: &DatabaseName,
        table: &str,
    ) -> Result<i64, StoreError> {
        let table = checked_table(table, &["rights", "users", "available_actions"])?;
        let pool = self.tenant(db_name).await?;
        count_rows(&pool, table).await
    }

    async fn directory(&self) -> SqlitePool {
        self.registry.get(DIRECTORY_KEY).await
    }

    async fn tenant(&self, db_name: &DatabaseName) -> Result<SqlitePool, StoreError> {
        let exists = tokio::fs::try_exists(self.tenant_path(db_name))
            .await
            .map_err(StoreError::backend)?;
        if !exists {
            return Err(StoreError::NotFound);
        }
        Ok(self.registry.get(db_name.as_str()).await)
    }
}

fn tenant_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(TENANT_DIR).join(format!("{name}.db"))
}

fn connect_options(data_dir: &Path, name: &str) -> SqliteConnectOptions {
    let opts = if name == DIRECTORY_KEY {
        SqliteConnectOptions::new()
            .filename(data_dir.join("directory.db"))
            .create_if_missing(true)
    } else {
        // Tenant files are only ever created by `create_database`.
        SqliteConnectOptions::new()
            .filename(tenant_path(data_dir, name))
            .create_if_missing(false)
    };
    opts.foreign_keys(true).busy_timeout(BUSY_TIMEOUT)
}

fn checked_table<'a>(table: &'a str, allowed: &[&str]) -> Result<&'a str, StoreError> {
    if allowed.contains(&table) {
        Ok(table)
    } else {
        Err(StoreError::Backend(format!("unknown table {table}")))
    }
}

async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64, StoreError> {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(map_err)?;
    Ok(n)
}

/// Classify by constraint kind reported by SQLite.
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

fn parse_id<T: FromStr>(s: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    T::from_str(s).map_err(StoreError::backend)
}

type AuthUserRow = (String, String, Option<String>, String, String);

fn auth_user_from_row(row: AuthUserRow) -> Result<AuthUser, StoreError> {
    let (id, email, phone, password_hash, company_id) = row;
    Ok(AuthUser {
        id: parse_id(&id)?,
        email,
        phone,
        password_hash,
        company_id: parse_id(&company_id)?,
    })
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ─────────────────────────────── Lifecycle ───────────────────────────────

    async fn create_database(
        &self,
        db_name: &DatabaseName,
    ) -> Result<DatabaseCreation, StoreError> {
        let path = self.tenant_path(db_name);
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match created {
            Ok(_) => {
                tracing::info!(db_name = %db_name, "created tenant database");
                Ok(DatabaseCreation::Created)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(db_name = %db_name, "tenant database already present");
                Ok(DatabaseCreation::AlreadyPresent)
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    async fn migrate_tenant(&self, db_name: &DatabaseName) -> Result<MigrationOutcome, StoreError> {
        let pool = self.tenant(db_name).await?;
        crm_db::migrate(&pool, &self.tenant_migrations, db_name.as_str())
            .await
            .map_err(StoreError::backend)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.registry.close_all().await.map_err(StoreError::backend)
    }

    // ─────────────────────────────── Transactions ───────────────────────────────

    async fn begin_directory(&self) -> Result<Box<dyn DirectoryTxn>, StoreError> {
        let tx = self
            .directory()
            .await
            .begin_with(BEGIN_WRITE)
            .await
            .map_err(map_err)?;
        Ok(Box::new(SqliteDirectoryTxn { tx }))
    }

    async fn begin_tenant(
        &self,
        db_name: &DatabaseName,
    ) -> Result<Box<dyn TenantTxn>, StoreError> {
        let tx = self
            .tenant(db_name)
            .await?
            .begin_with(BEGIN_WRITE)
            .await
            .map_err(map_err)?;
        Ok(Box::new(SqliteTenantTxn { tx }))
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
             WHERE email = ? OR phone = ?
             ORDER BY created_at, id",
        )
        .bind(email)
        .bind(phone)
        .fetch_all(&self.directory().await)
        .await
        .map_err(map_err)?;

        rows.into_iter().map(auth_user_from_row).collect()
    }

    async fn company_database(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<DatabaseName>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT db_name FROM companies WHERE id = ?")
            .bind(company_id.to_string())
            .fetch_optional(&self.directory().await)
            .await
            .map_err(map_err)?;

        row.map(|(name,)| DatabaseName::parse(&name).map_err(StoreError::backend))
            .transpose()
    }

    async fn find_tenant_user(
        &self,
        db_name: &DatabaseName,
        auth_id: &AuthUserId,
    ) -> Result<Option<TenantUserId>, StoreError> {
        let pool = self.tenant(db_name).await?;
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE auth_id = ?")
            .bind(auth_id.to_string())
            .fetch_optional(&pool)
            .await
            .map_err(map_err)?;

        row.map(|(id,)| parse_id(&id)).transpose()
    }
}

pub struct SqliteDirectoryTxn {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait::async_trait]
impl DirectoryTxn for SqliteDirectoryTxn {
    async fn find_company(
        &mut self,
        name: &str,
        address: &str,
    ) -> Result<Option<CompanyId>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM companies WHERE name = ? AND address = ?")
                .bind(name)
                .bind(address)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_err)?;

        row.map(|(id,)| parse_id(&id)).transpose()
    }

    async fn get_company(&mut self, company_id: &CompanyId) -> Result<Company, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, name, address, db_name FROM companies WHERE id = ?",
        )
        .bind(company_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((id, name, address, db_name)) => Ok(Company {
                id: parse_id(&id)?,
                name,
                address,
                db_name: DatabaseName::parse(&db_name).map_err(StoreError::backend)?,
            }),
        }
    }

    async fn insert_company(&mut self, params: &NewCompany) -> Result<CompanyId, StoreError> {
        let id = CompanyId::generate();
        sqlx::query(
            "INSERT INTO companies(id, name, address, db_name, created_at) VALUES(?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&params.name)
        .bind(&params.address)
        .bind(params.db_name.as_str())
        .bind(Utc::now().timestamp())
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(id)
    }

    async fn insert_auth_user(&mut self, params: &NewAuthUser) -> Result<AuthUserId, StoreError> {
        let id = AuthUserId::generate();
        sqlx::query(
            "INSERT INTO auth_users(id, email, phone, password, company_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&params.email)
        .bind(params.phone.as_deref())
        .bind(&params.password_hash)
        .bind(params.company_id.to_string())
        .bind(Utc::now().timestamp())
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
        // An email match wins over a phone match.
        let row = sqlx::query_as::<_, AuthUserRow>(
            "SELECT id, email, phone, password, company_id FROM auth_users
             WHERE email = ? OR phone = ?
             ORDER BY CASE WHEN email = ? THEN 0 ELSE 1 END
             LIMIT 1",
        )
        .bind(email)
        .bind(phone)
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;

        row.map(auth_user_from_row).transpose()
    }

    async fn delete_auth_user(&mut self, auth_id: &AuthUserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_users WHERE id = ?")
            .bind(auth_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete_company(&mut self, company_id: &CompanyId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM companies WHERE id = ?")
            .bind(company_id.to_string())
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

pub struct SqliteTenantTxn {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait::async_trait]
impl TenantTxn for SqliteTenantTxn {
    async fn insert_right(&mut self, role: &str) -> Result<RightId, StoreError> {
        let id = RightId::generate();
        sqlx::query("INSERT INTO rights(id, role) VALUES(?, ?)")
            .bind(id.to_string())
            .bind(role)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(id)
    }

    async fn insert_user(&mut self, params: &NewTenantUser) -> Result<TenantUserId, StoreError> {
        let id = TenantUserId::generate();
        sqlx::query(
            "INSERT INTO users(id, company_id, rights_id, auth_id, created_at) \
             VALUES(?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(params.company_id.to_string())
        .bind(params.rights_id.to_string())
        .bind(params.auth_id.to_string())
        .bind(Utc::now().timestamp())
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
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE auth_id = ? AND company_id = ?")
                .bind(auth_id.to_string())
                .bind(company_id.to_string())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_err)?;

        row.map(|(id,)| parse_id(&id)).transpose()
    }

    async fn insert_available_actions(
        &mut self,
        role_id: &RightId,
        capabilities: Capabilities,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO available_actions(role_id, create_tasks, create_chats, add_workers)
             VALUES(?, ?, ?, ?)",
        )
        .bind(role_id.to_string())
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
