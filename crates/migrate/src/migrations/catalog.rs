//! Migration Catalog - File system operations for migrations
//!
//! Finds `<name>-up.<ext>` / `<name>-down.<ext>` script pairs, orders them by
//! filename and scaffolds new pairs.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::definitions::{CreatedMigration, MigrationFile};
use crate::config::MigrationConfig;
use crate::error::{MigrateError, MigrateResult};

/// Timestamp prefix of generated migration names, e.g. `20240301093000`
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Migration catalog for listing, loading and creating migrations
#[derive(Debug, Clone)]
pub struct MigrationCatalog {
    migrations_dir: PathBuf,
    up_suffix: String,
    down_suffix: String,
}

impl MigrationCatalog {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            migrations_dir: config.migrations_dir.clone(),
            up_suffix: config.up_suffix(),
            down_suffix: config.down_suffix(),
        }
    }

    pub fn up_path(&self, name: &str) -> PathBuf {
        self.migrations_dir.join(format!("{}{}", name, self.up_suffix))
    }

    pub fn down_path(&self, name: &str) -> PathBuf {
        self.migrations_dir.join(format!("{}{}", name, self.down_suffix))
    }

    /// Every up script in the directory, sorted by filename
    ///
    /// Filenames are expected to carry a sortable timestamp prefix, so
    /// lexicographic order is apply order.
    pub fn list_up(&self) -> MigrateResult<Vec<MigrationFile>> {
        let entries = fs::read_dir(&self.migrations_dir)
            .map_err(|e| MigrateError::io(&self.migrations_dir, e))?;

        let mut filenames = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrateError::io(&self.migrations_dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(filename) if filename.ends_with(&self.up_suffix) => filenames.push(filename),
                Ok(_) => {}
                Err(raw) => {
                    tracing::warn!(file = ?raw, "Skipping migration file with a non UTF-8 name");
                }
            }
        }

        filenames.sort();

        Ok(filenames
            .into_iter()
            .filter_map(|filename| {
                let name = filename.strip_suffix(&self.up_suffix)?;
                // A bare `-up.sql` has no name to track.
                if name.is_empty() {
                    return None;
                }
                Some(MigrationFile {
                    name: name.to_string(),
                    up_path: self.migrations_dir.join(&filename),
                    down_path: self.down_path(name),
                })
            })
            .collect())
    }

    /// Up scripts not yet in `applied`, in apply order
    pub fn list_pending_up(&self, applied: &HashSet<String>) -> MigrateResult<Vec<MigrationFile>> {
        Ok(self
            .list_up()?
            .into_iter()
            .filter(|file| !applied.contains(&file.name))
            .collect())
    }

    /// Read the up script of a migration
    pub fn load_up_script(&self, file: &MigrationFile) -> MigrateResult<String> {
        fs::read_to_string(&file.up_path).map_err(|e| MigrateError::io(&file.up_path, e))
    }

    /// Read the down script paired with `name`
    pub fn load_down_script(&self, name: &str) -> MigrateResult<String> {
        let path = self.down_path(name);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => MigrateError::DownScriptMissing {
                name: name.to_string(),
                path: path.clone(),
            },
            _ => MigrateError::io(&path, e),
        })
    }

    /// Scaffold an up/down pair stamped with the current UTC time
    pub fn create_pair(&self, name: &str) -> MigrateResult<CreatedMigration> {
        self.create_pair_at(name, Utc::now())
    }

    /// Scaffold an up/down pair stamped with `now`
    ///
    /// Existing files are never overwritten.
    pub fn create_pair_at(&self, name: &str, now: DateTime<Utc>) -> MigrateResult<CreatedMigration> {
        let name = normalize_name(name)?;

        fs::create_dir_all(&self.migrations_dir)
            .map_err(|e| MigrateError::io(&self.migrations_dir, e))?;

        let base_name = format!("{}-{}", now.format(TIMESTAMP_FORMAT), name);
        let up_path = self.up_path(&base_name);
        let down_path = self.down_path(&base_name);
        let created = now.format("%Y-%m-%d %H:%M:%S UTC");

        write_new(
            &up_path,
            &format!(
                "-- Migration: {}\n-- Created: {}\n-- Write your UP migration here\n",
                base_name, created
            ),
        )?;

        if let Err(e) = write_new(
            &down_path,
            &format!(
                "-- Migration: {}\n-- Created: {}\n-- Write your DOWN migration here\n",
                base_name, created
            ),
        ) {
            // The up file was created by this call, take it back.
            let _ = fs::remove_file(&up_path);
            return Err(e);
        }

        Ok(CreatedMigration {
            base_name,
            up_path,
            down_path,
        })
    }
}

fn write_new(path: &Path, content: &str) -> MigrateResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => MigrateError::AlreadyExists {
                path: path.to_path_buf(),
            },
            _ => MigrateError::io(path, e),
        })?;

    file.write_all(content.as_bytes())
        .map_err(|e| MigrateError::io(path, e))
}

/// Whitespace becomes `_`; anything that could escape the directory is rejected
fn normalize_name(name: &str) -> MigrateResult<String> {
    let invalid = |reason: &str| MigrateError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if trimmed.contains(['/', '\\']) || trimmed.contains("..") {
        return Err(invalid("name must not contain path separators or '..'"));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(invalid("name must not contain control characters"));
    }

    Ok(trimmed.split_whitespace().collect::<Vec<_>>().join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn catalog(dir: &TempDir) -> MigrationCatalog {
        MigrationCatalog::new(&MigrationConfig::new(dir.path(), "schema_migrations"))
    }

    fn touch(dir: &TempDir, filename: &str, content: &str) {
        fs::write(dir.path().join(filename), content).unwrap();
    }

    #[test]
    fn test_lists_up_scripts_in_filename_order() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "20240102000000-b-up.sql", "B");
        touch(&dir, "20240101000000-a-up.sql", "A");
        touch(&dir, "20240101000000-a-down.sql", "-A");
        touch(&dir, "README.md", "notes");
        touch(&dir, "20240103000000-c-up.txt", "wrong extension");
        fs::create_dir(dir.path().join("20240104000000-d-up.sql")).unwrap();

        let files = catalog(&dir).list_up().unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(names, vec!["20240101000000-a", "20240102000000-b"]);
        assert_eq!(files[0].down_path, dir.path().join("20240101000000-a-down.sql"));
    }

    #[test]
    fn test_pending_filters_applied_names() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "0001-a-up.sql", "A");
        touch(&dir, "0002-b-up.sql", "B");
        touch(&dir, "0003-c-up.sql", "C");

        let applied: HashSet<String> = ["0002-b".to_string()].into_iter().collect();
        let pending = catalog(&dir).list_pending_up(&applied).unwrap();
        let names: Vec<_> = pending.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(names, vec!["0001-a", "0003-c"]);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let config = MigrationConfig::new(dir.path().join("nope"), "schema_migrations");
        let err = MigrationCatalog::new(&config).list_up().unwrap_err();
        assert!(matches!(err, MigrateError::Io { .. }));
    }

    #[test]
    fn test_missing_down_script() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "0001-a-up.sql", "A");

        let err = catalog(&dir).load_down_script("0001-a").unwrap_err();
        assert!(matches!(err, MigrateError::DownScriptMissing { ref name, .. } if name == "0001-a"));
    }

    #[test]
    fn test_create_pair_shares_base_name() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 15).unwrap();

        let created = catalog(&dir).create_pair_at("add_posts", now).unwrap();

        assert_eq!(created.base_name, "20240301093015-add_posts");
        assert_eq!(created.up_path, dir.path().join("20240301093015-add_posts-up.sql"));
        assert_eq!(created.down_path, dir.path().join("20240301093015-add_posts-down.sql"));

        let up = fs::read_to_string(&created.up_path).unwrap();
        let down = fs::read_to_string(&created.down_path).unwrap();
        assert!(up.contains("UP migration"));
        assert!(down.contains("DOWN migration"));
    }

    #[test]
    fn test_create_pair_creates_directory() {
        let dir = TempDir::new().unwrap();
        let config = MigrationConfig::new(dir.path().join("db").join("migrations"), "schema_migrations");

        let created = MigrationCatalog::new(&config).create_pair("init").unwrap();
        assert!(created.up_path.exists());
        assert!(created.down_path.exists());
    }

    #[test]
    fn test_create_pair_refuses_to_clobber() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 15).unwrap();
        let catalog = catalog(&dir);

        catalog.create_pair_at("add_posts", now).unwrap();
        fs::write(dir.path().join("20240301093015-add_posts-up.sql"), "CREATE TABLE posts ();").unwrap();

        let err = catalog.create_pair_at("add_posts", now).unwrap_err();
        assert!(matches!(err, MigrateError::AlreadyExists { .. }));
        assert_eq!(
            fs::read_to_string(dir.path().join("20240301093015-add_posts-up.sql")).unwrap(),
            "CREATE TABLE posts ();"
        );
    }

    #[test]
    fn test_create_pair_removes_up_when_down_collides() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 15).unwrap();
        touch(&dir, "20240301093015-add_posts-down.sql", "DROP TABLE posts;");

        let err = catalog(&dir).create_pair_at("add_posts", now).unwrap_err();
        assert!(matches!(err, MigrateError::AlreadyExists { .. }));
        assert!(!dir.path().join("20240301093015-add_posts-up.sql").exists());
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(normalize_name("add posts  table").unwrap(), "add_posts_table");
        assert!(matches!(normalize_name("  "), Err(MigrateError::InvalidName { .. })));
        assert!(matches!(normalize_name("../escape"), Err(MigrateError::InvalidName { .. })));
        assert!(matches!(normalize_name("a/b"), Err(MigrateError::InvalidName { .. })));
    }
}
