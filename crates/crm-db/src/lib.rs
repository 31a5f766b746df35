//! Database plumbing shared by the sqlx store backends.
//!
//! - [`ConnectionRegistry`] maps database names to live connection pools
//! - [`migrate`] applies a migration set and reports whether anything changed

mod migrate;
mod registry;

pub use migrate::{load_migrations, migrate};
pub use registry::{ConnectOptionsFor, ConnectionRegistry, PoolPolicy, RegistryError};
