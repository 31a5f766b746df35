//! Results of database lifecycle operations.

/// What `create_database` found in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatabaseCreation {
    Created,
    AlreadyPresent,
}

/// What a migration run changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// This many pending versions were applied.
    Applied(usize),
    /// The database was already at head.
    UpToDate,
}

impl MigrationOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, MigrationOutcome::Applied(n) if *n > 0)
    }
}
