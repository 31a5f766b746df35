//! Deployment configuration read from the environment.
//!
//! ```bash
//! # Store
//! CRM_STORE_BACKEND=postgres          # or sqlite
//! DB_HOST=db DB_PORT=5432 DB_USER=crm DB_PASSWORD=... DB_NAME=directory
//! CRM_SQLITE_DIR=/var/lib/crm          # sqlite backend only
//! TENANT_MIGRATIONS_PATH=/etc/crm/tenant-migrations   # optional, bundled set otherwise
//!
//! # Provisioning
//! FIRST_ROLE=admin
//! CRM_CALL_TIMEOUT_SECS=10
//!
//! # Mesh (the signing key is always required)
//! MESH_SIGNING_KEY=/etc/crm/mesh-key.pem
//! MESH_SIGNING_KEY_PASSPHRASE=...
//!
//! # Fingerprint cache
//! CRM_CACHE=mesh                       # or memory (default)
//! MESH_ENDPOINT=https://mesh.internal:8443
//! MESH_CA_CERT=/etc/crm/ca.pem MESH_CLIENT_CERT=/etc/crm/client.pem
//! MESH_CLIENT_KEY=/etc/crm/client-key.pem
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crm_store_postgres::PostgresConfig;
use thiserror::Error;
use zeroize::Zeroizing;

pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub enum BackendConfig {
    Postgres(PostgresConfig),
    Sqlite { data_dir: PathBuf },
}

/// Client side of mesh TLS.
#[derive(Debug, Clone)]
pub struct MeshTlsFiles {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

/// Where request fingerprints live.
#[derive(Debug, Clone)]
pub enum CacheConfig {
    /// Process-local map, purged periodically.
    Memory,
    /// The cache service, reached through the mesh routing endpoint.
    Mesh { endpoint: String, tls: MeshTlsFiles },
}

#[derive(Clone)]
pub struct SigningKeyConfig {
    pub path: PathBuf,
    pub passphrase: Option<Zeroizing<String>>,
}

impl SigningKeyConfig {
    /// `MESH_SIGNING_KEY` and its optional passphrase.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            path: PathBuf::from(required("MESH_SIGNING_KEY")?),
            passphrase: optional("MESH_SIGNING_KEY_PASSPHRASE").map(Zeroizing::new),
        })
    }
}

impl std::fmt::Debug for SigningKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyConfig")
            .field("path", &self.path)
            .field("encrypted", &self.passphrase.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend: BackendConfig,
    pub first_role: String,
    pub tenant_migrations: Option<PathBuf>,
    pub call_timeout: Duration,
    pub signing_key: SigningKeyConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Invalid store backend: {0}. Expected 'postgres' or 'sqlite'")]
    InvalidBackend(String),

    #[error("MESH_CA_CERT, MESH_CLIENT_CERT and MESH_CLIENT_KEY must be set together")]
    PartialMeshTls,

    #[error("{0} requires mesh TLS (MESH_CA_CERT, MESH_CLIENT_CERT, MESH_CLIENT_KEY)")]
    MeshTlsRequired(&'static str),
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = backend_from_env()?;
        let first_role = required("FIRST_ROLE")?;

        let call_timeout = match optional("CRM_CALL_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "CRM_CALL_TIMEOUT_SECS",
                        value: raw,
                    })
                }
            },
            None => Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        };

        let signing_key = SigningKeyConfig::from_env()?;
        let cache = cache_from_env()?;

        Ok(Self {
            backend,
            first_role,
            tenant_migrations: optional("TENANT_MIGRATIONS_PATH").map(PathBuf::from),
            call_timeout,
            signing_key,
            cache,
        })
    }
}

fn backend_from_env() -> Result<BackendConfig, ConfigError> {
    let kind = optional("CRM_STORE_BACKEND").unwrap_or_else(|| "postgres".to_string());
    match kind.to_lowercase().as_str() {
        "postgres" => {
            let raw_port = optional("DB_PORT").unwrap_or_else(|| "5432".to_string());
            let port = raw_port.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                var: "DB_PORT",
                value: raw_port.clone(),
            })?;
            Ok(BackendConfig::Postgres(PostgresConfig {
                host: required("DB_HOST")?,
                port,
                user: required("DB_USER")?,
                password: Zeroizing::new(required("DB_PASSWORD")?),
                directory_db: required("DB_NAME")?,
            }))
        }
        "sqlite" => Ok(BackendConfig::Sqlite {
            data_dir: PathBuf::from(required("CRM_SQLITE_DIR")?),
        }),
        other => Err(ConfigError::InvalidBackend(other.to_string())),
    }
}

fn mesh_tls_from_env() -> Result<Option<MeshTlsFiles>, ConfigError> {
    match (
        optional("MESH_CA_CERT"),
        optional("MESH_CLIENT_CERT"),
        optional("MESH_CLIENT_KEY"),
    ) {
        (Some(ca), Some(cert), Some(key)) => Ok(Some(MeshTlsFiles {
            ca_cert: ca.into(),
            client_cert: cert.into(),
            client_key: key.into(),
        })),
        (None, None, None) => Ok(None),
        _ => Err(ConfigError::PartialMeshTls),
    }
}

fn cache_from_env() -> Result<CacheConfig, ConfigError> {
    let tls = mesh_tls_from_env()?;
    let kind = optional("CRM_CACHE").unwrap_or_else(|| "memory".to_string());
    match kind.to_lowercase().as_str() {
        "memory" => Ok(CacheConfig::Memory),
        "mesh" => Ok(CacheConfig::Mesh {
            endpoint: required("MESH_ENDPOINT")?,
            tls: tls.ok_or(ConfigError::MeshTlsRequired("CRM_CACHE=mesh"))?,
        }),
        _ => Err(ConfigError::InvalidValue {
            var: "CRM_CACHE",
            value: kind,
        }),
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    optional(var).ok_or(ConfigError::MissingEnvVar(var))
}

/// Unset and empty are the same.
fn optional(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty())
}
