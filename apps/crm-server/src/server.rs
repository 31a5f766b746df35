use std::sync::Arc;
use std::time::Duration;

use crm_mesh::TokenVerifier;
use crm_storage::Store;
use tonic::Request;

use crate::deadline::Deadline;
use crate::error::CrmError;
use crate::fingerprint::Fingerprints;

/// Process-wide state shared by the provisioning, enrollment and login services.
pub struct CrmServer {
    pub store: Arc<dyn Store>,
    pub fingerprints: Fingerprints,
    /// Role granted to the administrator of a new tenant.
    pub first_role: String,
    pub call_timeout: Duration,
    /// Every call must carry a bearer token this accepts.
    pub verifier: TokenVerifier,
}

impl CrmServer {
    pub fn deadline<T>(&self, request: &Request<T>) -> Deadline {
        Deadline::from_metadata(request.metadata(), self.call_timeout)
    }

    pub fn authorize<T>(&self, request: &Request<T>) -> Result<(), CrmError> {
        let token = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(CrmError::Unauthenticated)?;

        self.verifier.verify(token).map(|_| ()).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            CrmError::Unauthenticated
        })
    }
}
