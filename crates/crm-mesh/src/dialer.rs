//! Outbound side of the mesh: one authenticated TLS channel per call.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crm_proto::enrollment_service_client::EnrollmentServiceClient;
use crm_proto::login_service_client::LoginServiceClient;
use crm_proto::provisioning_service_client::ProvisioningServiceClient;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Request, Status};

use crate::{CredentialMint, MeshError};

/// Connect and per-request timeout applied to every mesh channel.
pub const DEFAULT_MESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel whose requests all carry the same freshly minted bearer token.
pub type MeshChannel = InterceptedService<Channel, AttachBearer>;

/// Pinned CA plus this service's client identity, PEM encoded.
#[derive(Clone)]
pub struct MeshTls {
    ca_pem: Vec<u8>,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl MeshTls {
    pub fn from_pem(ca_pem: Vec<u8>, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Self {
        Self {
            ca_pem,
            cert_pem,
            key_pem,
        }
    }

    pub fn from_files(ca: &Path, cert: &Path, key: &Path) -> std::io::Result<Self> {
        Ok(Self::from_pem(
            std::fs::read(ca)?,
            std::fs::read(cert)?,
            std::fs::read(key)?,
        ))
    }

    fn client_config(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&self.ca_pem))
            .identity(Identity::from_pem(&self.cert_pem, &self.key_pem))
    }
}

#[derive(Clone)]
pub struct AttachBearer {
    header: MetadataValue<Ascii>,
}

impl AttachBearer {
    pub fn new(token: &str) -> Result<Self, MeshError> {
        let header = format!("Bearer {token}")
            .parse()
            .map_err(|_| MeshError::InvalidMetadata)?;
        Ok(Self { header })
    }
}

impl Interceptor for AttachBearer {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("authorization", self.header.clone());
        Ok(request)
    }
}

pub struct MeshDialer {
    endpoint: String,
    tls: ClientTlsConfig,
    mint: Arc<CredentialMint>,
    timeout: Duration,
}

impl MeshDialer {
    /// `endpoint` is the routing address every call goes to.
    pub fn new(endpoint: impl Into<String>, tls: &MeshTls, mint: Arc<CredentialMint>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls: tls.client_config(),
            mint,
            timeout: DEFAULT_MESH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Channel to the routing endpoint. Plain-text schemes are refused before any I/O.
    pub async fn dial(&self) -> Result<MeshChannel, MeshError> {
        let address = self.endpoint.as_str();
        let endpoint = https_endpoint(address)?
            .tls_config(self.tls.clone())?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);

        let channel = endpoint.connect().await.map_err(|err| {
            tracing::warn!(address, error = %err, "mesh dial failed");
            err
        })?;
        let token = self.mint.mint()?;
        Ok(InterceptedService::new(channel, AttachBearer::new(&token)?))
    }

    pub async fn provisioning(&self) -> Result<ProvisioningServiceClient<MeshChannel>, MeshError> {
        Ok(ProvisioningServiceClient::new(self.dial().await?))
    }

    pub async fn enrollment(&self) -> Result<EnrollmentServiceClient<MeshChannel>, MeshError> {
        Ok(EnrollmentServiceClient::new(self.dial().await?))
    }

    pub async fn login(&self) -> Result<LoginServiceClient<MeshChannel>, MeshError> {
        Ok(LoginServiceClient::new(self.dial().await?))
    }
}

fn https_endpoint(address: &str) -> Result<Endpoint, MeshError> {
    let endpoint = Endpoint::from_shared(address.to_string())
        .map_err(|_| MeshError::InvalidEndpoint(address.to_string()))?;
    if endpoint.uri().scheme_str() != Some("https") {
        return Err(MeshError::InsecureScheme(address.to_string()));
    }
    Ok(endpoint)
}
