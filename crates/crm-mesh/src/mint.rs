//! Signing side of mesh authentication.

use chrono::Utc;
use ed25519_dalek::{SigningKey, VerifyingKey};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::MeshError;

pub const MESH_SUBJECT: &str = "crm-mesh";
pub const MESH_SCOPE: &str = "mesh:internal";
pub const TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Claims carried by every mesh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshClaims {
    pub sub: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Holds the decrypted signing key for the life of the process.
pub struct CredentialMint {
    encoding: EncodingKey,
    verifying: VerifyingKey,
    seed: Zeroizing<[u8; 32]>,
}

impl CredentialMint {
    /// Decrypt a password-protected PKCS#8 PEM key.
    pub fn from_encrypted_pem(pem: &str, passphrase: &[u8]) -> Result<Self, MeshError> {
        let key = SigningKey::from_pkcs8_encrypted_pem(pem, passphrase)
            .map_err(|e| MeshError::InvalidKey(e.to_string()))?;
        Self::from_signing_key(&key)
    }

    /// Unencrypted PKCS#8 PEM key, for development setups.
    pub fn from_pem(pem: &str) -> Result<Self, MeshError> {
        let key =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| MeshError::InvalidKey(e.to_string()))?;
        Self::from_signing_key(&key)
    }

    pub fn from_signing_key(key: &SigningKey) -> Result<Self, MeshError> {
        let der = key
            .to_pkcs8_der()
            .map_err(|e| MeshError::InvalidKey(e.to_string()))?;
        Ok(Self {
            encoding: EncodingKey::from_ed_der(der.as_bytes()),
            verifying: key.verifying_key(),
            seed: Zeroizing::new(key.to_bytes()),
        })
    }

    /// Public half, for building a [`crate::TokenVerifier`].
    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying
    }

    /// Secret derived from the signing key, identical on every replica holding it.
    /// Distinct `context` strings give unrelated secrets.
    pub fn derive_secret(&self, context: &str) -> Result<Zeroizing<Vec<u8>>, MeshError> {
        Ok(crm_crypto::derive_key(self.seed.as_slice(), context)?)
    }

    /// Sign a fresh token valid for [`TOKEN_LIFETIME_SECS`].
    pub fn mint(&self) -> Result<String, MeshError> {
        let iat = Utc::now().timestamp();
        let claims = MeshClaims {
            sub: MESH_SUBJECT.to_string(),
            scope: MESH_SCOPE.to_string(),
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &MeshClaims) -> Result<String, MeshError> {
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            claims,
            &self.encoding,
        )?)
    }
}
