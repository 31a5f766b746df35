use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),
    #[error("stored password hash is malformed: {0}")]
    MalformedHash(argon2::password_hash::Error),
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("keyed digest needs a non-empty key")]
    EmptyKey,
}

/// Length of generated tenant database names.
pub const DATABASE_NAME_LEN: usize = 25;
/// Length of generated temporary passwords.
pub const TEMP_PASSWORD_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

// ──────────────────────────────────────────────────────────────────────────────
// Passwords
// ──────────────────────────────────────────────────────────────────────────────

/// Salted Argon2id hash in PHC string format.
pub fn hash_password_blocking(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(CryptoError::Hash)
}

/// `Ok(false)` on a wrong password; `Err` only when `phc` cannot be parsed.
pub fn verify_password_blocking(password: &str, phc: &str) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(phc).map_err(CryptoError::MalformedHash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::Hash(e)),
    }
}

/// [`hash_password_blocking`] on the blocking thread pool.
pub async fn hash_password(password: &str) -> Result<String, CryptoError> {
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || hash_password_blocking(&password)).await?
}

/// [`verify_password_blocking`] on the blocking thread pool.
pub async fn verify_password(password: &str, phc: &str) -> Result<bool, CryptoError> {
    let password = Zeroizing::new(password.to_string());
    let phc = phc.to_string();
    tokio::task::spawn_blocking(move || verify_password_blocking(&password, &phc)).await?
}

// ──────────────────────────────────────────────────────────────────────────────
// Identifiers
// ──────────────────────────────────────────────────────────────────────────────

/// Random tenant database name: ASCII letters only, from the OS CSPRNG.
pub fn generate_database_name() -> String {
    let mut rng = rand_core::OsRng;
    (0..DATABASE_NAME_LEN)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// Random alphanumeric password handed to newly created users once.
pub fn generate_temporary_password() -> String {
    rand_core::OsRng
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

// ──────────────────────────────────────────────────────────────────────────────
// Hashing utilities
// ──────────────────────────────────────────────────────────────────────────────

pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex SHA-256 over length-prefixed fields, so field boundaries cannot be shifted.
pub fn digest_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn keyed_mac(key: &[u8], fields: &[&str]) -> Result<HmacSha256, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::EmptyKey)?;
    for field in fields {
        mac.update(&(field.len() as u64).to_be_bytes());
        mac.update(field.as_bytes());
    }
    Ok(mac)
}

/// Hex HMAC-SHA256 over length-prefixed fields. Without `key` the digest cannot be
/// recomputed, so it is safe to store next to guessable inputs.
pub fn keyed_digest(key: &[u8], fields: &[&str]) -> Result<String, CryptoError> {
    Ok(hex::encode(keyed_mac(key, fields)?.finalize().into_bytes()))
}

/// 32-byte subkey of `secret` bound to `context`.
pub fn derive_key(secret: &[u8], context: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let bytes = keyed_mac(secret, &[context])?.finalize().into_bytes();
    Ok(Zeroizing::new(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let phc = hash_password_blocking("correct horse").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password_blocking("correct horse", &phc).unwrap());
        assert!(!verify_password_blocking("wrong horse", &phc).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password_blocking("same").unwrap();
        let b = hash_password_blocking("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(
            verify_password_blocking("pw", "plaintext"),
            Err(CryptoError::MalformedHash(_))
        ));
    }

    #[tokio::test]
    async fn async_wrappers() {
        let phc = hash_password("pw").await.unwrap();
        assert!(verify_password("pw", &phc).await.unwrap());
        assert!(!verify_password("nope", &phc).await.unwrap());
    }

    #[test]
    fn database_names_are_letters() {
        let name = generate_database_name();
        assert_eq!(name.len(), DATABASE_NAME_LEN);
        assert!(name.chars().all(|c| c.is_ascii_alphabetic()));
        assert_ne!(name, generate_database_name());
    }

    #[test]
    fn temporary_passwords_are_alphanumeric() {
        let pw = generate_temporary_password();
        assert_eq!(pw.len(), TEMP_PASSWORD_LEN);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn digest_respects_field_boundaries() {
        assert_ne!(digest_fields(&["ab", "c"]), digest_fields(&["a", "bc"]));
        assert_eq!(digest_fields(&["x"]), digest_fields(&["x"]));
        assert_eq!(digest_fields(&["x"]).len(), 64);
    }

    #[test]
    fn keyed_digest_needs_the_key() {
        let plain = digest_fields(&["a@x.ioLogin", "pw"]);
        let keyed = keyed_digest(b"server secret", &["a@x.ioLogin", "pw"]).unwrap();
        assert_ne!(keyed, plain);
        assert_eq!(keyed.len(), 64);
        assert_ne!(
            keyed,
            keyed_digest(b"other secret", &["a@x.ioLogin", "pw"]).unwrap()
        );
        assert_ne!(
            keyed_digest(b"k", &["ab", "c"]).unwrap(),
            keyed_digest(b"k", &["a", "bc"]).unwrap()
        );
        assert!(matches!(keyed_digest(b"", &["x"]), Err(CryptoError::EmptyKey)));
    }

    #[test]
    fn hmac_known_vector() {
        // RFC 4231 test case 2, fed as a single unprefixed message.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(b"Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn derived_keys_depend_on_context() {
        let a = derive_key(b"seed", "login-proof").unwrap();
        let b = derive_key(b"seed", "other").unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(*a, *b);
        assert_eq!(*a, *derive_key(b"seed", "login-proof").unwrap());
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hex::encode(hash_sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
