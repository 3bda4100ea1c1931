//! Tracking Store - the table that records applied migrations
//!
//! All SQL touching the tracking table lives here. Rows are read back as
//! untyped [`DatabaseRow`]s and mapped to [`MigrationRecord`] in one place.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::definitions::{AppliedMigrations, MigrationRecord};
use crate::backends::{DatabaseBackendType, DatabaseConnection, DatabaseRow, DatabaseValue};
use crate::error::{MigrateError, MigrateResult};

/// Accessor for the tracking table
#[derive(Debug, Clone)]
pub struct TrackingStore {
    table: String,
}

impl TrackingStore {
    /// The table name must already be validated (see [`crate::security`])
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// SQL to create the tracking table
    pub fn create_table_sql(&self, backend: DatabaseBackendType) -> String {
        match backend {
            DatabaseBackendType::PostgreSQL => format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    \
                    id SERIAL PRIMARY KEY,\n    \
                    name VARCHAR(255) NOT NULL UNIQUE,\n    \
                    hash VARCHAR(64) NOT NULL,\n    \
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n\
                )",
                self.table
            ),
            DatabaseBackendType::MySQL => format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    \
                    id INT AUTO_INCREMENT PRIMARY KEY,\n    \
                    name VARCHAR(255) NOT NULL UNIQUE,\n    \
                    hash VARCHAR(64) NOT NULL,\n    \
                    applied_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6)\n\
                )",
                self.table
            ),
            DatabaseBackendType::SQLite => format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    \
                    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
                    name VARCHAR(255) NOT NULL UNIQUE,\n    \
                    hash VARCHAR(64) NOT NULL,\n    \
                    applied_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))\n\
                )",
                self.table
            ),
        }
    }

    /// Create the tracking table if it does not exist
    pub async fn ensure_table(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<()> {
        let sql = self.create_table_sql(conn.backend_type());
        conn.execute(&sql, &[]).await.map_err(|e| match e {
            MigrateError::Database(message) => MigrateError::Database(format!(
                "Failed to create tracking table {}: {}",
                self.table, message
            )),
            other => other,
        })?;
        Ok(())
    }

    /// All applied migrations keyed by name
    pub async fn list_applied(
        &self,
        conn: &mut dyn DatabaseConnection,
    ) -> MigrateResult<AppliedMigrations> {
        let records = self.list_ordered(conn).await?;
        Ok(records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect())
    }

    /// All applied migrations, oldest first
    pub async fn list_ordered(
        &self,
        conn: &mut dyn DatabaseConnection,
    ) -> MigrateResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT id, name, hash, applied_at FROM {} ORDER BY applied_at ASC, id ASC",
            self.table
        );
        let rows = conn.fetch_all(&sql, &[]).await?;
        rows.iter().map(map_record).collect()
    }

    /// Record a migration as applied
    ///
    /// The caller checks membership first; a duplicate here means the
    /// applied-set snapshot was wrong.
    pub async fn record_applied(
        &self,
        conn: &mut dyn DatabaseConnection,
        name: &str,
        hash: &str,
    ) -> MigrateResult<()> {
        let backend = conn.backend_type();
        let sql = format!(
            "INSERT INTO {} (name, hash) VALUES ({}, {})",
            self.table,
            backend.placeholder(1),
            backend.placeholder(2)
        );

        match conn.execute(&sql, &[name.into(), hash.into()]).await {
            Ok(_) => Ok(()),
            Err(MigrateError::UniqueViolation(detail)) => Err(MigrateError::Invariant(format!(
                "migration '{}' is already recorded in {} ({})",
                name, self.table, detail
            ))),
            Err(e) => Err(e),
        }
    }

    /// Remove the tracking record of a rolled back migration
    pub async fn record_rolled_back(
        &self,
        conn: &mut dyn DatabaseConnection,
        name: &str,
    ) -> MigrateResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE name = {}",
            self.table,
            conn.backend_type().placeholder(1)
        );
        conn.execute(&sql, &[name.into()]).await
    }

    /// The most recently applied migration, optionally restricted to one name
    pub async fn most_recent_applied(
        &self,
        conn: &mut dyn DatabaseConnection,
        name: Option<&str>,
    ) -> MigrateResult<Option<MigrationRecord>> {
        let (filter, params) = match name {
            Some(name) => (
                format!(" WHERE name = {}", conn.backend_type().placeholder(1)),
                vec![DatabaseValue::from(name)],
            ),
            None => (String::new(), Vec::new()),
        };
        let sql = format!(
            "SELECT id, name, hash, applied_at FROM {}{} ORDER BY applied_at DESC, id DESC LIMIT 1",
            self.table, filter
        );

        let rows = conn.fetch_all(&sql, &params).await?;
        rows.first().map(map_record).transpose()
    }
}

fn map_record(row: &DatabaseRow) -> MigrateResult<MigrationRecord> {
    let id = match row.get_by_name("id")? {
        DatabaseValue::Int64(id) => *id,
        other => return Err(unexpected("id", other)),
    };
    let name = text_column(row, "name")?;
    let hash = text_column(row, "hash")?;
    let applied_at = match row.get_by_name("applied_at")? {
        DatabaseValue::DateTime(at) => *at,
        DatabaseValue::String(raw) => parse_timestamp(raw)?,
        other => return Err(unexpected("applied_at", other)),
    };

    Ok(MigrationRecord {
        id,
        name,
        hash,
        applied_at,
    })
}

fn text_column(row: &DatabaseRow, column: &str) -> MigrateResult<String> {
    match row.get_by_name(column)? {
        DatabaseValue::String(value) => Ok(value.clone()),
        other => Err(unexpected(column, other)),
    }
}

fn unexpected(column: &str, value: &DatabaseValue) -> MigrateError {
    MigrateError::Mapping(format!(
        "Unexpected value for tracking column '{}': {:?}",
        column, value
    ))
}

/// Timestamps stored as text (SQLite) come as `YYYY-MM-DD HH:MM:SS[.fff]`
fn parse_timestamp(raw: &str) -> MigrateResult<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| MigrateError::Mapping(format!("Invalid applied_at '{}': {}", raw, e)))
}
