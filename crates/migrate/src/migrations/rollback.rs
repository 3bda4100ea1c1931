//! Migration Rollback - Undo the most recent applied migration
//!
//! A rollback runs the paired down script and removes the tracking record.
//! When the down script cannot be loaded the database is left untouched and
//! the record stays, so the migration is still reported as applied.

use super::definitions::RollbackOutcome;
use super::engine::MigrationEngine;
use crate::backends::DatabaseConnection;
use crate::error::{MigrateError, MigrateResult};

impl MigrationEngine {
    /// Roll back the most recently applied migration, or the named one
    pub async fn rollback(
        &self,
        conn: &mut dyn DatabaseConnection,
        target: Option<&str>,
    ) -> MigrateResult<RollbackOutcome> {
        self.store().ensure_table(conn).await?;

        let Some(record) = self.store().most_recent_applied(conn, target).await? else {
            match target {
                Some(name) => tracing::info!(migration = name, "Migration is not applied"),
                None => tracing::info!("No migrations to roll back"),
            }
            return Ok(RollbackOutcome::NothingToRollBack);
        };

        let script = match self.catalog().load_down_script(&record.name) {
            Ok(script) => script,
            Err(e) => {
                tracing::error!(
                    migration = %record.name,
                    error = %e,
                    "Cannot roll back migration, down script unavailable"
                );
                return Ok(RollbackOutcome::Skipped {
                    name: record.name,
                    reason: e.to_string(),
                });
            }
        };

        tracing::info!(migration = %record.name, "Rolling back migration");
        self.run_down(conn, &record.name, &script)
            .await
            .map_err(|e| MigrateError::for_migration(&record.name, e))?;

        Ok(RollbackOutcome::RolledBack { name: record.name })
    }

    async fn run_down(
        &self,
        conn: &mut dyn DatabaseConnection,
        name: &str,
        script: &str,
    ) -> MigrateResult<()> {
        conn.execute_script(script).await?;

        let removed = self.store().record_rolled_back(conn, name).await?;
        if removed != 1 {
            return Err(MigrateError::Invariant(format!(
                "expected to remove one tracking record for '{}', removed {}",
                name, removed
            )));
        }
        Ok(())
    }
}
