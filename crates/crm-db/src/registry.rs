//! Process-wide mapping from database name to connection pool.
//!
//! Pools are opened lazily, so inserting a new entry performs no I/O and the map's entry
//! lock is the only critical section. Concurrent lookups of one name therefore always share
//! a single pool. Liveness probes happen after the lock is released.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::pool::PoolOptions;
use sqlx::{Connection, Database, Pool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Connect options type of a sqlx database driver.
pub type ConnectOptionsFor<DB> = <<DB as Database>::Connection as Connection>::Options;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Limits applied to every pool the registry opens.
#[derive(Clone, Debug)]
pub struct PoolPolicy {
    pub max_connections: u32,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    /// Also bounds the liveness probe.
    pub acquire_timeout: Duration,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            max_connections: 25,
            max_lifetime: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection pools did not close in time: {}", .0.join(", "))]
    CloseTimedOut(Vec<String>),
}

struct Slot<DB: Database> {
    pool: Pool<DB>,
    generation: u64,
}

pub struct ConnectionRegistry<DB: Database> {
    slots: DashMap<String, Slot<DB>>,
    connect_options: Box<dyn Fn(&str) -> ConnectOptionsFor<DB> + Send + Sync>,
    policy: PoolPolicy,
    next_generation: AtomicU64,
}

impl<DB: Database> ConnectionRegistry<DB> {
    /// `connect_options` builds the driver options for a database name; it must not do I/O.
    pub fn new<F>(policy: PoolPolicy, connect_options: F) -> Self
    where
        F: Fn(&str) -> ConnectOptionsFor<DB> + Send + Sync + 'static,
    {
        Self {
            slots: DashMap::new(),
            connect_options: Box::new(connect_options),
            policy,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Pool for `db_name`, replacing a cached pool that fails its liveness probe.
    pub async fn get(&self, db_name: &str) -> Pool<DB> {
        let (pool, generation, fresh) = self.lookup_or_open(db_name);
        if fresh {
            return pool;
        }

        match self.probe(&pool).await {
            Ok(()) => pool,
            Err(err) => {
                tracing::warn!(db_name, error = %err, "replacing stale connection pool");
                self.evict(db_name, generation);
                self.lookup_or_open(db_name).0
            }
        }
    }

    /// Close every pool. Pools that do not close within the timeout are reported together.
    pub async fn close_all(&self) -> Result<(), RegistryError> {
        let names: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();

        let mut stuck = Vec::new();
        for name in names {
            if let Some((name, slot)) = self.slots.remove(&name) {
                if tokio::time::timeout(CLOSE_TIMEOUT, slot.pool.close())
                    .await
                    .is_err()
                {
                    stuck.push(name);
                }
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::CloseTimedOut(stuck))
        }
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn lookup_or_open(&self, db_name: &str) -> (Pool<DB>, u64, bool) {
        match self.slots.entry(db_name.to_string()) {
            Entry::Occupied(slot) => (slot.get().pool.clone(), slot.get().generation, false),
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let pool = self.open(db_name);
                vacant.insert(Slot {
                    pool: pool.clone(),
                    generation,
                });
                tracing::debug!(db_name, generation, "opened connection pool");
                (pool, generation, true)
            }
        }
    }

    fn open(&self, db_name: &str) -> Pool<DB> {
        PoolOptions::<DB>::new()
            .max_connections(self.policy.max_connections)
            .max_lifetime(self.policy.max_lifetime)
            .idle_timeout(self.policy.idle_timeout)
            .acquire_timeout(self.policy.acquire_timeout)
            .connect_lazy_with((self.connect_options)(db_name))
    }

    async fn probe(&self, pool: &Pool<DB>) -> Result<(), sqlx::Error> {
        let mut conn = pool.acquire().await?;
        conn.ping().await
    }

    /// Remove the entry only if nobody replaced it since `generation` was observed.
    fn evict(&self, db_name: &str, generation: u64) {
        if let Some((_, slot)) = self
            .slots
            .remove_if(db_name, |_, slot| slot.generation == generation)
        {
            tokio::spawn(async move { slot.pool.close().await });
        }
    }
}
