//! Strongly-typed identifiers (avoid mixing strings/UUIDs arbitrarily).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh time-ordered identifier.
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Company identifier (directory database).
    CompanyId
);
uuid_id!(
    /// Directory-level user identifier.
    AuthUserId
);
uuid_id!(
    /// Tenant-local user identifier.
    TenantUserId
);
uuid_id!(
    /// Tenant-local right (role) identifier.
    RightId
);

/// Longest identifier Postgres accepts without truncation.
pub const MAX_DATABASE_NAME_LEN: usize = 63;

/// Name of a database managed by the store.
///
/// Only ASCII letters are accepted, which keeps names safe to splice into DDL and into
/// file names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseName(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidDatabaseName {
    #[error("database name is empty")]
    Empty,
    #[error("database name is longer than {MAX_DATABASE_NAME_LEN} characters")]
    TooLong,
    #[error("database name may only contain ASCII letters")]
    InvalidCharacter,
}

impl DatabaseName {
    pub fn parse(name: &str) -> Result<Self, InvalidDatabaseName> {
        if name.is_empty() {
            return Err(InvalidDatabaseName::Empty);
        }
        if name.len() > MAX_DATABASE_NAME_LEN {
            return Err(InvalidDatabaseName::TooLong);
        }
        if !name.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(InvalidDatabaseName::InvalidCharacter);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DatabaseName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for DatabaseName {
    type Err = InvalidDatabaseName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_accepts_letters() {
        let name = DatabaseName::parse("AbcDefGhiJklMnoPqrStuVwXy").unwrap();
        assert_eq!(name.as_str(), "AbcDefGhiJklMnoPqrStuVwXy");
        assert_eq!(name.to_string(), "AbcDefGhiJklMnoPqrStuVwXy");
    }

    #[test]
    fn database_name_rejects_injection() {
        assert_eq!(
            DatabaseName::parse("tenant\"; DROP DATABASE x; --"),
            Err(InvalidDatabaseName::InvalidCharacter)
        );
        assert_eq!(
            DatabaseName::parse("tenant_1"),
            Err(InvalidDatabaseName::InvalidCharacter)
        );
        assert_eq!(
            DatabaseName::parse("../directory"),
            Err(InvalidDatabaseName::InvalidCharacter)
        );
    }

    #[test]
    fn database_name_bounds() {
        assert_eq!(DatabaseName::parse(""), Err(InvalidDatabaseName::Empty));
        let long = "a".repeat(MAX_DATABASE_NAME_LEN + 1);
        assert_eq!(DatabaseName::parse(&long), Err(InvalidDatabaseName::TooLong));
        let max = "a".repeat(MAX_DATABASE_NAME_LEN);
        assert!(DatabaseName::parse(&max).is_ok());
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = CompanyId::generate();
        let parsed: CompanyId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TenantUserId>().is_err());
    }
}
