//! Undo of committed directory writes after the tenant transaction failed.

use std::time::Duration;

use crm_storage::{AuthUserId, CompanyId, Store, StoreError};

use crate::deadline::Deadline;
use crate::error::CrmError;

/// Directory rows written by one request, deleted in a single transaction.
#[derive(Debug, Default)]
pub struct DirectoryUndo {
    pub auth_users: Vec<AuthUserId>,
    pub company: Option<CompanyId>,
}

impl DirectoryUndo {
    /// Runs under its own budget so an expired request deadline does not block cleanup.
    /// Returns the error the caller should report.
    pub async fn run(
        &self,
        store: &dyn Store,
        call_timeout: Duration,
        original: CrmError,
    ) -> CrmError {
        let deadline = Deadline::after(call_timeout);
        let outcome = match deadline.run("compensation", self.apply(store)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(timeout) => Err(timeout.to_string()),
        };

        match outcome {
            Ok(()) => {
                tracing::warn!(
                    company_id = ?self.company,
                    auth_ids = ?self.auth_users,
                    error = %original,
                    "tenant write failed, directory rows removed"
                );
                original
            }
            Err(compensation) => {
                tracing::error!(
                    reconciliation = true,
                    company_id = ?self.company,
                    auth_ids = ?self.auth_users,
                    error = %original,
                    compensation_error = %compensation,
                    "compensation failed, directory rows left behind"
                );
                CrmError::CompensationFailed {
                    original: Box::new(original),
                    compensation,
                }
            }
        }
    }

    async fn apply(&self, store: &dyn Store) -> Result<(), StoreError> {
        let mut txn = store.begin_directory().await?;
        for auth_id in &self.auth_users {
            txn.delete_auth_user(auth_id).await?;
        }
        if let Some(company_id) = &self.company {
            txn.delete_company(company_id).await?;
        }
        txn.commit().await
    }
}
