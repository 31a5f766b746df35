//! Request fingerprints kept in the shared cache.
//!
//! Successful registrations and logins publish a tagged [`Envelope`] under a key derived
//! from the request. A later identical request finds it and skips the expensive path.
//! The cache is an optimisation only: every cache failure is logged and treated as a miss.

use std::sync::Arc;

use crm_cache::{Cache, Ttl};
use crm_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::deadline::Deadline;

pub const FINGERPRINT_TTL_SECS: u64 = 600;

/// Derivation context for the login proof key.
pub const LOGIN_PROOF_CONTEXT: &str = "crm-login-proof";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Registration {
        company_name: String,
        db_name: String,
        tenant_user_id: String,
        intent_digest: String,
    },
    Login {
        db_name: String,
        tenant_user_id: String,
        proof: String,
    },
}

pub fn register_key(company_name: &str) -> String {
    format!("{company_name}Register")
}

/// Email when given, otherwise phone.
pub fn login_identity<'a>(email: &'a str, phone: &'a str) -> &'a str {
    if email.is_empty() {
        phone
    } else {
        email
    }
}

pub fn login_key(identity: &str) -> String {
    format!("{identity}Login")
}

/// Digest of everything a registration asks for, minus the password.
pub fn intent_digest(company_name: &str, address: &str, email: &str, phone: &str) -> String {
    crm_crypto::digest_fields(&[company_name, address, email, phone])
}

#[derive(Clone)]
pub struct Fingerprints {
    cache: Arc<dyn Cache>,
    proof_key: Arc<Zeroizing<Vec<u8>>>,
}

impl Fingerprints {
    /// `proof_key` must be the same on every replica sharing `cache`.
    pub fn new(cache: Arc<dyn Cache>, proof_key: Zeroizing<Vec<u8>>) -> Self {
        Self {
            cache,
            proof_key: Arc::new(proof_key),
        }
    }

    /// Binds a cached login to the password that produced it. Keyed with a server
    /// secret so the cached value cannot be brute-forced offline.
    pub fn login_proof(&self, key: &str, password: &str) -> Result<String, CryptoError> {
        crm_crypto::keyed_digest(&self.proof_key, &[key, password])
    }

    pub async fn lookup(&self, key: &str, deadline: &Deadline) -> Option<Envelope> {
        let raw = match deadline.run("cache lookup", self.cache.get(key)).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return None,
            Ok(Err(err)) => {
                tracing::warn!(key, error = %err, "fingerprint lookup failed");
                return None;
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "fingerprint lookup timed out");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                tracing::warn!(key, error = %err, "ignoring undecodable fingerprint");
                None
            }
        }
    }

    /// SET-if-absent with the fingerprint TTL. Never fails the caller.
    pub async fn publish(&self, key: &str, envelope: &Envelope, deadline: &Deadline) {
        let value = match serde_json::to_string(envelope) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode fingerprint");
                return;
            }
        };
        let ttl = match Ttl::from_secs(FINGERPRINT_TTL_SECS) {
            Ok(ttl) => ttl,
            Err(err) => {
                tracing::warn!(key, error = %err, "invalid fingerprint ttl");
                return;
            }
        };

        match deadline
            .run("cache publish", self.cache.set_if_absent(key, &value, ttl))
            .await
        {
            Ok(Ok(true)) => tracing::debug!(key, "fingerprint published"),
            Ok(Ok(false)) => tracing::info!(key, "fingerprint already present"),
            Ok(Err(err)) => tracing::warn!(key, error = %err, "fingerprint publish failed"),
            Err(err) => tracing::warn!(key, error = %err, "fingerprint publish timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_cache_memory::MemoryCache;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn fingerprints(cache: Arc<dyn Cache>) -> Fingerprints {
        Fingerprints::new(cache, Zeroizing::new(b"proof key".to_vec()))
    }

    fn login_envelope() -> Envelope {
        Envelope::Login {
            db_name: "AbcDef".into(),
            tenant_user_id: "0190f1a2-0000-7000-8000-000000000001".into(),
            proof: "p".into(),
        }
    }

    #[test]
    fn keys() {
        assert_eq!(register_key("Acme"), "AcmeRegister");
        assert_eq!(login_key(login_identity("a@x.io", "5551234567")), "a@x.ioLogin");
        assert_eq!(login_key(login_identity("", "5551234567")), "5551234567Login");
    }

    #[test]
    fn envelope_is_tagged() {
        let json = serde_json::to_value(login_envelope()).unwrap();
        assert_eq!(json["kind"], "login");

        let reg = Envelope::Registration {
            company_name: "Acme".into(),
            db_name: "AbcDef".into(),
            tenant_user_id: "id".into(),
            intent_digest: "d".into(),
        };
        assert_eq!(serde_json::to_value(reg).unwrap()["kind"], "registration");
    }

    #[test]
    fn proofs_depend_on_password() {
        let fingerprints = fingerprints(Arc::new(MemoryCache::new()));
        let key = login_key("a@x.io");
        assert_eq!(
            fingerprints.login_proof(&key, "pw").unwrap(),
            fingerprints.login_proof(&key, "pw").unwrap()
        );
        assert_ne!(
            fingerprints.login_proof(&key, "pw").unwrap(),
            fingerprints.login_proof(&key, "pw2").unwrap()
        );
    }

    #[test]
    fn proofs_need_the_server_secret() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let key = login_key("a@x.io");
        let proof = fingerprints(cache.clone()).login_proof(&key, "pw").unwrap();

        // Anyone reading the cache can compute an unkeyed digest; it must not match.
        assert_ne!(proof, crm_crypto::digest_fields(&[&key, "pw"]));
        assert_ne!(proof, crm_crypto::digest_fields(&["pw"]));

        let other = Fingerprints::new(cache, Zeroizing::new(b"another key".to_vec()));
        assert_ne!(proof, other.login_proof(&key, "pw").unwrap());
    }

    #[test]
    fn digest_changes_with_administrator() {
        let a = intent_digest("Acme", "1 Main", "a@x.io", "");
        let b = intent_digest("Acme", "1 Main", "b@x.io", "");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn publish_then_lookup() {
        let fingerprints = fingerprints(Arc::new(MemoryCache::new()));
        assert_eq!(fingerprints.lookup("k", &deadline()).await, None);

        fingerprints.publish("k", &login_envelope(), &deadline()).await;
        assert_eq!(
            fingerprints.lookup("k", &deadline()).await,
            Some(login_envelope())
        );
    }

    #[tokio::test]
    async fn first_publisher_wins() {
        let fingerprints = fingerprints(Arc::new(MemoryCache::new()));
        fingerprints.publish("k", &login_envelope(), &deadline()).await;

        let other = Envelope::Login {
            db_name: "Other".into(),
            tenant_user_id: "x".into(),
            proof: "q".into(),
        };
        fingerprints.publish("k", &other, &deadline()).await;
        assert_eq!(
            fingerprints.lookup("k", &deadline()).await,
            Some(login_envelope())
        );
    }

    #[tokio::test]
    async fn garbage_is_a_miss() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set_if_absent("k", "not json", Ttl::from_secs(60).unwrap())
            .await
            .unwrap();
        let fingerprints = fingerprints(cache);
        assert_eq!(fingerprints.lookup("k", &deadline()).await, None);
    }
}
