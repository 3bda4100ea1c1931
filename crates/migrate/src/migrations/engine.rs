//! Migration Engine - Executes migrations against the database
//!
//! The engine holds no database state of its own. Every operation reads the
//! tracking table through the connection it is given, so two runs never share
//! a stale view of what is applied.

use std::collections::HashSet;
use std::time::Instant;

use super::catalog::MigrationCatalog;
use super::definitions::{
    AppliedMigration, AppliedMigrations, ApplyReport, CreatedMigration, MigrationFile,
    MigrationRecord, MigrationState, MigrationStatus, StatusReport,
};
use super::tracking::TrackingStore;
use crate::backends::DatabaseConnection;
use crate::config::MigrationConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::hashing::hash_script;

/// Orchestrates apply, rollback, create, list and status
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    config: MigrationConfig,
    catalog: MigrationCatalog,
    store: TrackingStore,
}

impl MigrationEngine {
    /// Validates the configuration before anything touches disk or database
    pub fn new(config: MigrationConfig) -> MigrateResult<Self> {
        config.validate()?;

        Ok(Self {
            catalog: MigrationCatalog::new(&config),
            store: TrackingStore::new(config.tracking_table.clone()),
            config,
        })
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &TrackingStore {
        &self.store
    }

    /// Run all pending migrations in filename order
    ///
    /// Stops at the first failure. Migrations before it stay applied and
    /// recorded; the failing one is not recorded.
    pub async fn apply(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<ApplyReport> {
        let start_time = Instant::now();

        self.store.ensure_table(conn).await?;
        let applied = self.store.list_applied(conn).await?;

        if self.config.verify_checksums {
            self.verify_checksums(&applied)?;
        }

        let applied_names: HashSet<String> = applied.keys().cloned().collect();
        let pending = self.catalog.list_pending_up(&applied_names)?;

        if pending.is_empty() {
            tracing::info!(applied = applied.len(), "Database is up to date");
        }

        let mut report = ApplyReport {
            skipped: applied.len(),
            ..ApplyReport::default()
        };

        for migration in &pending {
            let applied_migration = self
                .apply_one(conn, migration)
                .await
                .map_err(|e| MigrateError::for_migration(&migration.name, e))?;
            report.applied.push(applied_migration);
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        Ok(report)
    }

    async fn apply_one(
        &self,
        conn: &mut dyn DatabaseConnection,
        migration: &MigrationFile,
    ) -> MigrateResult<AppliedMigration> {
        let script = self.catalog.load_up_script(migration)?;
        let hash = hash_script(&script);

        tracing::info!(migration = %migration.name, "Applying migration");
        conn.execute_script(&script).await?;
        self.store.record_applied(conn, &migration.name, &hash).await?;

        Ok(AppliedMigration {
            name: migration.name.clone(),
            hash,
        })
    }

    /// Fail on the first applied migration whose up script no longer matches
    /// its recorded hash. Records without a file on disk are not checked.
    fn verify_checksums(&self, applied: &AppliedMigrations) -> MigrateResult<()> {
        for file in self.catalog.list_up()? {
            let Some(record) = applied.get(&file.name) else {
                continue;
            };

            let current = hash_script(self.catalog.load_up_script(&file)?);
            if current != record.hash {
                tracing::error!(
                    migration = %file.name,
                    recorded = %record.hash,
                    current = %current,
                    "Applied migration changed on disk"
                );
                return Err(MigrateError::Drift {
                    name: file.name,
                    recorded: record.hash.clone(),
                    current,
                });
            }
        }

        Ok(())
    }

    /// Scaffold a new up/down pair; needs no database
    pub fn create(&self, name: &str) -> MigrateResult<CreatedMigration> {
        let created = self.catalog.create_pair(name)?;
        tracing::info!(
            migration = %created.base_name,
            up = %created.up_path.display(),
            down = %created.down_path.display(),
            "Created migration files"
        );
        Ok(created)
    }

    /// Applied migrations, oldest first
    pub async fn list(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<Vec<MigrationRecord>> {
        self.store.ensure_table(conn).await?;
        self.store.list_ordered(conn).await
    }

    /// Every on-disk migration with its applied state and drift flag
    pub async fn status(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<StatusReport> {
        self.store.ensure_table(conn).await?;
        let mut applied = self.store.list_applied(conn).await?;

        let mut migrations = Vec::new();
        for file in self.catalog.list_up()? {
            let state = match applied.remove(&file.name) {
                Some(record) => {
                    let current = hash_script(self.catalog.load_up_script(&file)?);
                    MigrationState::Applied {
                        applied_at: record.applied_at,
                        drifted: current != record.hash,
                    }
                }
                None => MigrationState::Pending,
            };
            migrations.push(MigrationStatus {
                name: file.name,
                state,
            });
        }

        let mut orphaned: Vec<MigrationRecord> = applied.into_values().collect();
        orphaned.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then(a.id.cmp(&b.id)));

        Ok(StatusReport {
            migrations,
            orphaned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteConnection;
    use std::fs;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> MigrationEngine {
        MigrationEngine::new(MigrationConfig::new(dir.path(), "schema_migrations")).unwrap()
    }

    async fn memory() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:", None).await.unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = MigrationEngine::new(MigrationConfig::new("./migrations", "bad name")).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_apply_records_hash_of_script() {
        let dir = TempDir::new().unwrap();
        let script = "CREATE TABLE users (id INTEGER PRIMARY KEY);";
        fs::write(dir.path().join("0001-users-up.sql"), script).unwrap();

        let engine = engine(&dir);
        let mut conn = memory().await;
        let report = engine.apply(&mut conn).await.unwrap();

        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.applied[0].hash, hash_script(script));

        let applied = engine.store().list_applied(&mut conn).await.unwrap();
        assert_eq!(applied["0001-users"].hash, hash_script(script));
    }

    #[tokio::test]
    async fn test_status_flags_pending_drift_and_orphans() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001-a-up.sql"), "CREATE TABLE a (id INT);").unwrap();
        fs::write(dir.path().join("0002-b-up.sql"), "CREATE TABLE b (id INT);").unwrap();

        let engine = engine(&dir);
        let mut conn = memory().await;
        engine.apply(&mut conn).await.unwrap();

        fs::write(dir.path().join("0001-a-up.sql"), "CREATE TABLE a (id BIGINT);").unwrap();
        fs::remove_file(dir.path().join("0002-b-up.sql")).unwrap();
        fs::write(dir.path().join("0003-c-up.sql"), "CREATE TABLE c (id INT);").unwrap();

        let status = engine.status(&mut conn).await.unwrap();

        assert_eq!(status.migrations.len(), 2);
        assert_eq!(status.migrations[0].name, "0001-a");
        assert!(matches!(status.migrations[0].state, MigrationState::Applied { drifted: true, .. }));
        assert_eq!(status.migrations[1].name, "0003-c");
        assert!(status.migrations[1].is_pending());
        assert_eq!(status.pending_count(), 1);
        assert_eq!(status.orphaned.len(), 1);
        assert_eq!(status.orphaned[0].name, "0002-b");
    }
}
