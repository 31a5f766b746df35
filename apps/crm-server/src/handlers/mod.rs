//! gRPC service implementations.
//!
//! - provisioning: company registration
//! - enrollment: batch user enrollment
//! - login: credential resolution
//! - cache: the in-memory cache service
//!
//! Domain failures of the three core services travel in the response body (`status` and
//! `message`), not as gRPC errors.

pub mod cache;
pub mod enrollment;
pub mod login;
pub mod provisioning;

use crm_storage::{DatabaseName, TenantUserId};
use tonic::{Request, Response, Status};

use crate::error::CrmError;
use crate::metrics::RequestTimer;
use crate::server::CrmServer;
use crm_proto::enrollment_service_server::EnrollmentService;
use crm_proto::login_service_server::LoginService;
use crm_proto::provisioning_service_server::ProvisioningService;
use crm_proto::*;

pub const STATUS_OK: i32 = 200;

#[tonic::async_trait]
impl ProvisioningService for CrmServer {
    async fn register_company(
        &self,
        request: Request<RegisterCompanyRequest>,
    ) -> Result<Response<RegisterCompanyResponse>, Status> {
        provisioning::register_company(self, request).await
    }
}

#[tonic::async_trait]
impl EnrollmentService for CrmServer {
    async fn register_users_in_company(
        &self,
        request: Request<RegisterUsersRequest>,
    ) -> Result<Response<RegisterUsersResponse>, Status> {
        enrollment::register_users_in_company(self, request).await
    }
}

#[tonic::async_trait]
impl LoginService for CrmServer {
    async fn login_db(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        login::login_db(self, request).await
    }
}

/// Log and count a failed call; returns the body `status` and `message`.
pub(crate) fn reject(method: &'static str, timer: RequestTimer, err: &CrmError) -> (i32, String) {
    if err.is_client_error() {
        tracing::info!(method, error = %err, "request rejected");
    } else {
        tracing::error!(method, error = %err, "request failed");
    }
    timer.error(err.metric_code());
    (err.status(), err.public_message())
}

/// `database` and `user-id` response metadata.
pub(crate) fn attach_identity<T>(
    response: &mut Response<T>,
    db_name: &DatabaseName,
    tenant_user_id: &TenantUserId,
) {
    let metadata = response.metadata_mut();
    match db_name.as_str().parse() {
        Ok(value) => {
            metadata.insert("database", value);
        }
        Err(_) => tracing::warn!(db_name = %db_name, "database name is not valid metadata"),
    }
    match tenant_user_id.to_string().parse() {
        Ok(value) => {
            metadata.insert("user-id", value);
        }
        Err(_) => tracing::warn!("tenant user id is not valid metadata"),
    }
}
