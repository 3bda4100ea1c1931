//! Error types for the migration engine
//!
//! Every fallible operation in this crate returns [`MigrateResult`]. Errors that
//! concern a single migration are wrapped in [`MigrateError::MigrationFailed`]
//! so the offending migration name is always part of the report.

use std::path::PathBuf;

use crate::config::ConfigError;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Invalid or missing configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Could not establish or keep a database connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement or script execution failed
    #[error("Database error: {0}")]
    Database(String),

    /// A database call exceeded the configured timeout
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// A row returned by the database could not be mapped
    #[error("Row mapping error: {0}")]
    Mapping(String),

    /// Filesystem access failed
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The paired down script of an applied migration is not on disk
    #[error("Down script for migration '{name}' not found at {}", path.display())]
    DownScriptMissing { name: String, path: PathBuf },

    /// Refusing to overwrite an existing migration file
    #[error("Migration file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// Migration name rejected by `create`
    #[error("Invalid migration name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// On-disk content of an applied migration no longer matches its recorded hash
    #[error("Migration '{name}' has changed since it was applied (recorded {recorded}, found {current})")]
    Drift {
        name: String,
        recorded: String,
        current: String,
    },

    /// A unique constraint was violated
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Internal invariant broken, e.g. a duplicate tracking record
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// A single migration failed; carries the migration name and the cause
    #[error("Migration '{name}' failed: {source}")]
    MigrationFailed {
        name: String,
        #[source]
        source: Box<MigrateError>,
    },
}

impl MigrateError {
    /// Wrap an error with the name of the migration it belongs to
    pub fn for_migration(name: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::MigrationFailed {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }

    /// Name of the migration this error is attached to, if any
    pub fn migration_name(&self) -> Option<&str> {
        match self {
            MigrateError::MigrationFailed { name, .. }
            | MigrateError::DownScriptMissing { name, .. }
            | MigrateError::Drift { name, .. } => Some(name),
            _ => None,
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for MigrateError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                MigrateError::UniqueViolation(db_err.message().to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MigrateError::Connection(err.to_string()),
            _ => MigrateError::Database(err.to_string()),
        }
    }
}
