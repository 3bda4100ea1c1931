//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the values passed between the catalog, the tracking store and the
//! engine, plus the reports each engine operation returns.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A migration script pair found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFile {
    /// Filename without the `-up.<ext>` suffix, e.g. `20240101120000-create_users`
    pub name: String,
    /// Path of the up script
    pub up_path: PathBuf,
    /// Path where the paired down script is expected; it may not exist
    pub down_path: PathBuf,
}

/// A row of the tracking table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub id: i64,
    /// Migration name, unique
    pub name: String,
    /// SHA-256 of the up script at apply time
    pub hash: String,
    /// Set by the database on insert
    pub applied_at: DateTime<Utc>,
}

/// Applied migrations keyed by name
pub type AppliedMigrations = HashMap<String, MigrationRecord>;

/// One migration executed by `apply`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub name: String,
    pub hash: String,
}

/// Result of running pending migrations
#[derive(Debug, Default, Serialize)]
pub struct ApplyReport {
    /// Migrations executed in this run, in execution order
    pub applied: Vec<AppliedMigration>,
    /// Number of migrations that were already applied
    pub skipped: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// What `rollback` did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// No applied migration matched
    NothingToRollBack,
    /// The down script ran and the tracking record was removed
    RolledBack { name: String },
    /// The down script could not be loaded; the tracking record was kept
    Skipped { name: String, reason: String },
}

/// Files written by `create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedMigration {
    /// `<timestamp>-<name>`, shared by both files
    pub base_name: String,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
}

/// Applied state of an on-disk migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Applied {
        applied_at: DateTime<Utc>,
        /// The up script changed since it was applied
        drifted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

impl MigrationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, MigrationState::Pending)
    }
}

/// Every on-disk migration with its state, plus records without a file
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// In apply (filename) order
    pub migrations: Vec<MigrationStatus>,
    /// Tracking records whose up script is no longer on disk
    pub orphaned: Vec<MigrationRecord>,
}

impl StatusReport {
    pub fn pending_count(&self) -> usize {
        self.migrations.iter().filter(|m| m.is_pending()).count()
    }
}
