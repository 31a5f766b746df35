//! The Store trait that backends implement.

use crate::types::*;
use crate::StoreError;

/// Open transaction on the directory database.
///
/// Dropping the value without calling [`DirectoryTxn::commit`] rolls the transaction back.
#[async_trait::async_trait]
pub trait DirectoryTxn: Send {
    /// Company with exactly this name and address, if any.
    async fn find_company(
        &mut self,
        name: &str,
        address: &str,
    ) -> Result<Option<CompanyId>, StoreError>;

    /// Get company by ID.
    async fn get_company(&mut self, company_id: &CompanyId) -> Result<Company, StoreError>;

    /// Insert a company (returns generated ID).
    async fn insert_company(&mut self, params: &NewCompany) -> Result<CompanyId, StoreError>;

    /// Insert a directory user (returns generated ID).
    async fn insert_auth_user(&mut self, params: &NewAuthUser) -> Result<AuthUserId, StoreError>;

    /// First user whose email matches, or whose phone matches when a phone is given.
    ///
    /// Sees rows inserted earlier in this same transaction.
    async fn find_auth_user(
        &mut self,
        email: &str,
        phone: Option<&str>,
    ) -> Result<Option<AuthUser>, StoreError>;

    async fn delete_auth_user(&mut self, auth_id: &AuthUserId) -> Result<(), StoreError>;

    async fn delete_company(&mut self, company_id: &CompanyId) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Open transaction on one tenant database.
///
/// Dropping the value without calling [`TenantTxn::commit`] rolls the transaction back.
#[async_trait::async_trait]
pub trait TenantTxn: Send {
    /// Insert a right with the given role (returns generated ID).
    async fn insert_right(&mut self, role: &str) -> Result<RightId, StoreError>;

    /// Insert a tenant user. Fails with `MissingReference` when the right does not exist.
    async fn insert_user(&mut self, params: &NewTenantUser) -> Result<TenantUserId, StoreError>;

    /// Tenant user linked to a directory user of the given company.
    async fn find_user(
        &mut self,
        auth_id: &AuthUserId,
        company_id: &CompanyId,
    ) -> Result<Option<TenantUserId>, StoreError>;

    /// Insert the capability row of a role.
    async fn insert_available_actions(
        &mut self,
        role_id: &RightId,
        capabilities: Capabilities,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// The storage trait the CRM core depends on.
///
/// Every pool the store opens is owned by its connection registry; callers never see a
/// raw connection.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────── Lifecycle ───────────────────────────────

    /// Create a database unless the catalog already lists it.
    async fn create_database(&self, db_name: &DatabaseName)
        -> Result<DatabaseCreation, StoreError>;

    /// Bring a tenant database to the head of the tenant migration set.
    async fn migrate_tenant(&self, db_name: &DatabaseName) -> Result<MigrationOutcome, StoreError>;

    /// Close every pool the store holds.
    async fn close(&self) -> Result<(), StoreError>;

    // ─────────────────────────────── Transactions ───────────────────────────────

    async fn begin_directory(&self) -> Result<Box<dyn DirectoryTxn>, StoreError>;

    async fn begin_tenant(&self, db_name: &DatabaseName) -> Result<Box<dyn TenantTxn>, StoreError>;

    // ─────────────────────────────── Reads ───────────────────────────────

    /// Directory users whose email matches, or whose phone matches when a phone is given.
    async fn find_auth_users(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<AuthUser>, StoreError>;

    /// Tenant database name of a company, if the company exists.
    async fn company_database(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<DatabaseName>, StoreError>;

    /// Tenant user linked to a directory user.
    async fn find_tenant_user(
        &self,
        db_name: &DatabaseName,
        auth_id: &AuthUserId,
    ) -> Result<Option<TenantUserId>, StoreError>;
}
