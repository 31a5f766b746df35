//! Storage abstraction for the CRM core.
//!
//! Backend crates (`crm-store-postgres`, `crm-store-sqlite`) implement [`Store`] so the
//! provisioning, enrollment and login code never depends on a database engine, SQL dialect
//! or schema detail. Two kinds of database sit behind one store:
//!
//! - the shared **directory** database (`companies`, `auth_users`)
//! - one **tenant** database per company (`rights`, `users`, `available_actions`)
//!
//! Multi-statement work happens inside explicit transactions ([`DirectoryTxn`],
//! [`TenantTxn`]). Dropping a transaction without committing rolls it back.

use thiserror::Error;

mod store;
mod types;

pub use store::*;
pub use types::*;

/// Uniform error type for all storage backends.
///
/// The variant is decided where the database reports the failure (constraint kind, missing
/// row), never by inspecting error text.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    /// A foreign key points at a row that does not exist.
    #[error("missing reference")]
    MissingReference,
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}
