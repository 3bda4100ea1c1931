//! # shiftdb-migrate: Versioned SQL migrations
//!
//! Applies timestamp-prefixed `<name>-up.sql` scripts in filename order,
//! records each one with a SHA-256 of its contents in a tracking table, and
//! rolls back one migration at a time with the paired `<name>-down.sql`.
//!
//! PostgreSQL, MySQL and SQLite are supported through sqlx. The engine is
//! stateless; every operation takes the connection it should work on:
//!
//! ```no_run
//! use shiftdb_migrate::{backends, DatabaseSettings, MigrationConfig, MigrationEngine};
//!
//! # async fn run() -> shiftdb_migrate::MigrateResult<()> {
//! let config = MigrationConfig::from_env()?;
//! let settings = DatabaseSettings::from_env()?;
//! let engine = MigrationEngine::new(config.clone())?;
//!
//! let mut conn = backends::connect(&settings, &config).await?;
//! let report = engine.apply(conn.as_mut()).await;
//! conn.close().await?;
//! println!("applied {}", report?.applied_count());
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod hashing;
pub mod migrations;
pub mod security;

pub use backends::{DatabaseBackendType, DatabaseConnection, DatabaseRow, DatabaseValue};
pub use config::{ConfigError, DatabaseSettings, MigrationConfig};
pub use error::{MigrateError, MigrateResult};
pub use hashing::hash_script;
pub use migrations::*;
