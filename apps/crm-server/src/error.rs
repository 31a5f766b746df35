//! Error taxonomy of the CRM core and its mapping to response statuses.

use crm_storage::StoreError;
use thiserror::Error;

/// Coarse classification used by the RPC boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Unauthenticated,
    NotFound,
    AlreadyExists,
    Dependency,
    Timeout,
    Inconsistent,
    CompensationFailed,
}

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    #[error("dependency failure: {0}")]
    Dependency(String),

    #[error("deadline exceeded during {0}")]
    Timeout(&'static str),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Directory cleanup after a failed tenant write did not complete.
    #[error("compensation failed ({compensation}) after: {original}")]
    CompensationFailed {
        original: Box<CrmError>,
        compensation: String,
    },
}

impl CrmError {
    /// Classify a store failure touching `entity`.
    pub fn store(entity: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CrmError::NotFound(entity),
            StoreError::AlreadyExists => CrmError::AlreadyExists(entity),
            StoreError::MissingReference => {
                CrmError::InvalidRequest(format!("unknown {entity} reference"))
            }
            StoreError::Backend(msg) => CrmError::Dependency(msg),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CrmError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CrmError::Unauthenticated => ErrorKind::Unauthenticated,
            CrmError::NotFound(_) => ErrorKind::NotFound,
            CrmError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            CrmError::Dependency(_) => ErrorKind::Dependency,
            CrmError::Timeout(_) => ErrorKind::Timeout,
            CrmError::Inconsistent(_) => ErrorKind::Inconsistent,
            CrmError::CompensationFailed { .. } => ErrorKind::CompensationFailed,
        }
    }

    /// HTTP-style status carried in response bodies.
    pub fn status(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::Dependency => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Inconsistent | ErrorKind::CompensationFailed => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status() < 500
    }

    /// Message safe to show callers. Server-side failures never expose their cause.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Dependency => "dependency unavailable".to_string(),
            ErrorKind::Timeout => "request timed out".to_string(),
            ErrorKind::Inconsistent | ErrorKind::CompensationFailed => {
                "internal error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Label used on error metrics.
    pub fn metric_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Inconsistent => "inconsistent",
            ErrorKind::CompensationFailed => "compensation_failed",
        }
    }
}

impl From<crm_crypto::CryptoError> for CrmError {
    fn from(err: crm_crypto::CryptoError) -> Self {
        CrmError::Dependency(err.to_string())
    }
}
