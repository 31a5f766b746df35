//! Cache abstraction for request fingerprints.
//!
//! Two operations are enough for idempotency bookkeeping: plain GET and SET-if-absent with
//! a time-to-live. Implementations:
//! - Memory (single process, `crm-cache-memory`)
//! - gRPC (the mesh cache service, `crm-mesh`)

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("ttl must be at least one second")]
    ZeroTtl,
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Strictly positive time-to-live with one-second resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ttl(u64);

impl Ttl {
    pub fn from_secs(secs: u64) -> Result<Self, CacheError> {
        if secs == 0 {
            return Err(CacheError::ZeroTtl);
        }
        Ok(Self(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` unless `key` already holds a live value.
    ///
    /// Returns `true` when this call stored the value, `false` when it lost to an
    /// existing entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Ttl) -> Result<bool, CacheError>;
}
