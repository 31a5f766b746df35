//! Receiving side of mesh authentication.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use pkcs8::DecodePublicKey;
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::mint::{MeshClaims, MESH_SCOPE, MESH_SUBJECT};
use crate::MeshError;

#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn from_verifying_key(key: &VerifyingKey) -> Result<Self, MeshError> {
        let decoding = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(key.as_bytes()))?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.sub = Some(MESH_SUBJECT.to_string());
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            decoding,
            validation,
        })
    }

    /// SPKI PEM public key (`-----BEGIN PUBLIC KEY-----`).
    pub fn from_public_pem(pem: &str) -> Result<Self, MeshError> {
        let key = VerifyingKey::from_public_key_pem(pem)
            .map_err(|e| MeshError::InvalidKey(e.to_string()))?;
        Self::from_verifying_key(&key)
    }

    /// Signature, expiry, subject and scope.
    pub fn verify(&self, token: &str) -> Result<MeshClaims, MeshError> {
        let claims = jsonwebtoken::decode::<MeshClaims>(token, &self.decoding, &self.validation)?
            .claims;
        if claims.scope != MESH_SCOPE {
            return Err(MeshError::Rejected(format!("unexpected scope {}", claims.scope)));
        }
        Ok(claims)
    }
}

/// Interceptor rejecting requests without a valid `authorization: Bearer` token.
#[derive(Clone)]
pub struct RequireBearer {
    verifier: TokenVerifier,
}

impl RequireBearer {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }
}

impl Interceptor for RequireBearer {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let token = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| Status::unauthenticated("missing bearer token"))?;

        match self.verifier.verify(token) {
            Ok(_) => Ok(request),
            Err(err) => {
                tracing::debug!(error = %err, "rejected mesh token");
                Err(Status::unauthenticated("invalid bearer token"))
            }
        }
    }
}
