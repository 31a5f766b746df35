//! Client traits for testability.
//!
//! Commands talk to these traits rather than the generated clients, so they can be
//! exercised against mocks without a mesh.

use async_trait::async_trait;
use crm_mesh::MeshChannel;
use crm_proto::enrollment_service_client::EnrollmentServiceClient;
use crm_proto::login_service_client::LoginServiceClient;
use crm_proto::provisioning_service_client::ProvisioningServiceClient;
use crm_proto::{
    LoginRequest, LoginResponse, RegisterCompanyRequest, RegisterCompanyResponse,
    RegisterUsersRequest, RegisterUsersResponse,
};
use tonic::{Request, Response, Status};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn register_company(
        &mut self,
        request: Request<RegisterCompanyRequest>,
    ) -> Result<Response<RegisterCompanyResponse>, Status>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnrollmentClient: Send + Sync {
    async fn register_users_in_company(
        &mut self,
        request: Request<RegisterUsersRequest>,
    ) -> Result<Response<RegisterUsersResponse>, Status>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoginClient: Send + Sync {
    async fn login_db(
        &mut self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status>;
}

#[async_trait]
impl ProvisioningClient for ProvisioningServiceClient<MeshChannel> {
    async fn register_company(
        &mut self,
        request: Request<RegisterCompanyRequest>,
    ) -> Result<Response<RegisterCompanyResponse>, Status> {
        ProvisioningServiceClient::register_company(self, request).await
    }
}

#[async_trait]
impl EnrollmentClient for EnrollmentServiceClient<MeshChannel> {
    async fn register_users_in_company(
        &mut self,
        request: Request<RegisterUsersRequest>,
    ) -> Result<Response<RegisterUsersResponse>, Status> {
        EnrollmentServiceClient::register_users_in_company(self, request).await
    }
}

#[async_trait]
impl LoginClient for LoginServiceClient<MeshChannel> {
    async fn login_db(
        &mut self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        LoginServiceClient::login_db(self, request).await
    }
}
