//! Service-to-service plumbing of the CRM mesh.
//!
//! Every call between services runs over mutually authenticated TLS and carries a
//! short-lived EdDSA bearer token:
//! - [`CredentialMint`] signs tokens with the mesh signing key
//! - [`TokenVerifier`] checks them on the receiving side
//! - [`MeshDialer`] opens one authenticated channel per call
//! - [`GrpcCache`] is the cache client speaking to the cache service

mod cache;
mod dialer;
mod error;
mod mint;
mod verify;

pub use cache::GrpcCache;
pub use dialer::{AttachBearer, MeshChannel, MeshDialer, MeshTls, DEFAULT_MESH_TIMEOUT};
pub use error::MeshError;
pub use mint::{CredentialMint, MeshClaims, MESH_SCOPE, MESH_SUBJECT, TOKEN_LIFETIME_SECS};
pub use verify::{RequireBearer, TokenVerifier};
