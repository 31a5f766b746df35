//! Request deadlines.
//!
//! A request inherits the caller's `grpc-timeout`, capped by the configured call budget.
//! Every store, cache and hashing step runs under [`Deadline::run`], which also caps the
//! single step at one call budget. Once the deadline has passed no new I/O is started.

use std::future::Future;
use std::time::Duration;

use crm_storage::StoreError;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;

use crate::error::CrmError;

#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Deadline of an inbound call: the caller's `grpc-timeout` if shorter than `budget`.
    pub fn from_metadata(metadata: &MetadataMap, budget: Duration) -> Self {
        let caller = metadata
            .get("grpc-timeout")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout);
        let total = caller.map_or(budget, |c| c.min(budget));
        Self {
            at: Instant::now() + total,
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn ensure_open(&self, step: &'static str) -> Result<(), CrmError> {
        if self.remaining().is_zero() {
            return Err(CrmError::Timeout(step));
        }
        Ok(())
    }

    /// Run one step. The step's own output is handed back untouched.
    pub async fn run<F: Future>(&self, step: &'static str, fut: F) -> Result<F::Output, CrmError> {
        self.ensure_open(step)?;
        let limit = self.at.min(Instant::now() + self.budget);
        tokio::time::timeout_at(limit, fut)
            .await
            .map_err(|_| CrmError::Timeout(step))
    }

    /// Run a store step, classifying its failure against `entity`.
    pub async fn store<T, F>(
        &self,
        step: &'static str,
        entity: &'static str,
        fut: F,
    ) -> Result<T, CrmError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.run(step, fut)
            .await?
            .map_err(|err| CrmError::store(entity, err))
    }
}

/// `grpc-timeout` header value: at most 8 digits followed by a unit.
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}
