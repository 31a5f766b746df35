//! Shared fixtures: SQLite-backed servers and a store wrapper that injects faults.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crm_cache::Cache;
use crm_cache_memory::MemoryCache;
use crm_mesh::{CredentialMint, TokenVerifier};
use crm_storage::*;
use crm_store_sqlite::{bundled_tenant_migrations, SqliteStore};
use ed25519_dalek::SigningKey;
use tempfile::TempDir;
use tonic::Request;
use zeroize::Zeroizing;

use crate::deadline::Deadline;
use crate::fingerprint::{Fingerprints, LOGIN_PROOF_CONTEXT};
use crate::provisioner::{self, Registration, RegistrationIntent};
use crate::server::CrmServer;

pub const TEST_ROLE: &str = "admin";
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const PASSWORD: &str = "p";

pub struct TestEnv {
    pub server: CrmServer,
    pub sqlite: Arc<SqliteStore>,
    pub cache: Arc<MemoryCache>,
    /// Signs the bearer tokens `server` accepts.
    pub mint: Arc<CredentialMint>,
    _dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let (dir, sqlite) = open_sqlite().await;
        let store: Arc<dyn Store> = sqlite.clone();
        Self::build(dir, sqlite, store, Arc::new(MemoryCache::new()))
    }

    /// Server whose store misbehaves as described by `faults`.
    pub async fn faulty(faults: Faults) -> Self {
        let (dir, sqlite) = open_sqlite().await;
        let store: Arc<dyn Store> = Arc::new(FaultyStore::new(sqlite.clone(), faults));
        Self::build(dir, sqlite, store, Arc::new(MemoryCache::new()))
    }

    /// Server whose fingerprints go to `cache` instead of a fresh memory cache.
    pub async fn with_cache(cache: Arc<dyn Cache>) -> Self {
        let (dir, sqlite) = open_sqlite().await;
        let store: Arc<dyn Store> = sqlite.clone();
        let mut env = Self::build(dir, sqlite, store, Arc::new(MemoryCache::new()));
        env.server.fingerprints = fingerprints(&env.mint, cache);
        env
    }

    fn build(
        dir: TempDir,
        sqlite: Arc<SqliteStore>,
        store: Arc<dyn Store>,
        cache: Arc<MemoryCache>,
    ) -> Self {
        let mint = Arc::new(
            CredentialMint::from_signing_key(&SigningKey::generate(&mut rand_core::OsRng))
                .unwrap(),
        );
        let server = crm_server(&mint, store, cache.clone());
        Self {
            server,
            sqlite,
            cache,
            mint,
            _dir: dir,
        }
    }

    /// Second server over the same databases, with a misbehaving store.
    pub fn server_with_faults(&self, faults: Faults) -> CrmServer {
        let store = Arc::new(FaultyStore::new(self.sqlite.clone(), faults));
        crm_server(&self.mint, store, self.cache.clone())
    }

    /// `body` wrapped in a request carrying a freshly minted bearer token.
    pub fn authorized<T>(&self, body: T) -> Request<T> {
        let mut request = Request::new(body);
        let header = format!("Bearer {}", self.mint.mint().unwrap());
        request
            .metadata_mut()
            .insert("authorization", header.parse().unwrap());
        request
    }

    pub async fn register(
        &self,
        intent: RegistrationIntent,
    ) -> Result<Registration, crate::error::CrmError> {
        provisioner::register(&self.server, intent, &deadline()).await
    }

    pub async fn directory_rows(&self, table: &str) -> i64 {
        self.sqlite.directory_row_count(table).await.unwrap()
    }

    pub async fn tenant_rows(&self, db_name: &DatabaseName, table: &str) -> i64 {
        self.sqlite.tenant_row_count(db_name, table).await.unwrap()
    }

    /// Extra role in a tenant, committed directly.
    pub async fn add_role(&self, db_name: &DatabaseName, role: &str) -> RightId {
        let mut txn = self.sqlite.begin_tenant(db_name).await.unwrap();
        let id = txn.insert_right(role).await.unwrap();
        txn.commit().await.unwrap();
        id
    }

    /// Company of the Acme administrator, checked against `db_name`.
    pub async fn acme_company(&self, db_name: &DatabaseName) -> CompanyId {
        let users = self
            .sqlite
            .find_auth_users(Some("a@acme.test"), None)
            .await
            .unwrap();
        let company_id = users[0].company_id;
        assert_eq!(
            self.sqlite.company_database(&company_id).await.unwrap().as_ref(),
            Some(db_name)
        );
        company_id
    }
}

fn fingerprints(mint: &CredentialMint, cache: Arc<dyn Cache>) -> Fingerprints {
    Fingerprints::new(cache, mint.derive_secret(LOGIN_PROOF_CONTEXT).unwrap())
}

fn crm_server(mint: &CredentialMint, store: Arc<dyn Store>, cache: Arc<MemoryCache>) -> CrmServer {
    CrmServer {
        store,
        fingerprints: fingerprints(mint, cache),
        first_role: TEST_ROLE.to_string(),
        call_timeout: CALL_TIMEOUT,
        verifier: TokenVerifier::from_verifying_key(&mint.verifying_key()).unwrap(),
    }
}

async fn open_sqlite() -> (TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path(), bundled_tenant_migrations())
        .await
        .unwrap();
    (dir, Arc::new(store))
}

pub fn deadline() -> Deadline {
    Deadline::after(CALL_TIMEOUT)
}

pub fn intent(company: &str, email: &str, phone: &str) -> RegistrationIntent {
    RegistrationIntent {
        company_name: company.to_string(),
        address: "1 Road".to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
        password: Zeroizing::new(PASSWORD.to_string()),
    }
}

/// Scenario 1 input.
pub fn acme() -> RegistrationIntent {
    intent("Acme", "a@acme.test", "1234567890")
}

// ──────────────────────────────────────────────────────────────────────────────
// Fault injection
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Faults {
    /// Tenant commits fail (after rolling back).
    pub fail_tenant_commit: bool,
    /// Once a tenant fault fires, the directory stops accepting transactions.
    pub directory_down_after_tenant_fault: bool,
    /// Tenant migrations take this long.
    pub slow_migrate: Option<Duration>,
}

pub struct FaultyStore {
    inner: Arc<SqliteStore>,
    faults: Faults,
    directory_down: Arc<AtomicBool>,
}

impl FaultyStore {
    pub fn new(inner: Arc<SqliteStore>, faults: Faults) -> Self {
        Self {
            inner,
            faults,
            directory_down: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn create_database(
        &self,
        db_name: &DatabaseName,
    ) -> Result<DatabaseCreation, StoreError> {
        self.inner.create_database(db_name).await
    }

    async fn migrate_tenant(
        &self,
        db_name: &DatabaseName,
    ) -> Result<MigrationOutcome, StoreError> {
        if let Some(delay) = self.faults.slow_migrate {
            tokio::time::sleep(delay).await;
        }
        self.inner.migrate_tenant(db_name).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }

    async fn begin_directory(&self) -> Result<Box<dyn DirectoryTxn>, StoreError> {
        if self.directory_down.load(Ordering::SeqCst) {
            return Err(StoreError::backend("directory unavailable"));
        }
        self.inner.begin_directory().await
    }

    async fn begin_tenant(
        &self,
        db_name: &DatabaseName,
    ) -> Result<Box<dyn TenantTxn>, StoreError> {
        let inner = self.inner.begin_tenant(db_name).await?;
        Ok(Box::new(FaultyTenantTxn {
            inner,
            fail_commit: self.faults.fail_tenant_commit,
            trip: self
                .faults
                .directory_down_after_tenant_fault
                .then(|| self.directory_down.clone()),
        }))
    }

    async fn find_auth_users(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<AuthUser>, StoreError> {
        self.inner.find_auth_users(email, phone).await
    }

    async fn company_database(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<DatabaseName>, StoreError> {
        self.inner.company_database(company_id).await
    }

    async fn find_tenant_user(
        &self,
        db_name: &DatabaseName,
        auth_id: &AuthUserId,
    ) -> Result<Option<TenantUserId>, StoreError> {
        self.inner.find_tenant_user(db_name, auth_id).await
    }
}

struct FaultyTenantTxn {
    inner: Box<dyn TenantTxn>,
    fail_commit: bool,
    trip: Option<Arc<AtomicBool>>,
}

#[async_trait]
impl TenantTxn for FaultyTenantTxn {
    async fn insert_right(&mut self, role: &str) -> Result<RightId, StoreError> {
        self.inner.insert_right(role).await
    }

    async fn insert_user(&mut self, params: &NewTenantUser) -> Result<TenantUserId, StoreError> {
        self.inner.insert_user(params).await
    }

    async fn find_user(
        &mut self,
        auth_id: &AuthUserId,
        company_id: &CompanyId,
    ) -> Result<Option<TenantUserId>, StoreError> {
        self.inner.find_user(auth_id, company_id).await
    }

    async fn insert_available_actions(
        &mut self,
        role_id: &RightId,
        capabilities: Capabilities,
    ) -> Result<(), StoreError> {
        self.inner.insert_available_actions(role_id, capabilities).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let FaultyTenantTxn {
            inner,
            fail_commit,
            trip,
        } = *self;
        if !fail_commit {
            return inner.commit().await;
        }
        inner.rollback().await?;
        if let Some(trip) = trip {
            trip.store(true, Ordering::SeqCst);
        }
        Err(StoreError::backend("tenant commit failed"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
