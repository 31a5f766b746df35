use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("refusing to dial {0}: mesh endpoints must use https")]
    InsecureScheme(String),
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("token rejected: {0}")]
    Rejected(String),
    #[error("token is not a valid header value")]
    InvalidMetadata,
    #[error("key derivation failed: {0}")]
    Derive(#[from] crm_crypto::CryptoError),
}
