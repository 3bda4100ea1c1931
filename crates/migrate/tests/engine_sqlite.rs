//! End-to-end engine behavior against an in-memory SQLite database

use std::fs;
use std::path::Path;
use std::time::Duration;

use shiftdb_migrate::backends::{self, SqliteConnection};
use shiftdb_migrate::{
    hash_script, DatabaseConnection, DatabaseSettings, MigrateError, MigrationConfig,
    MigrationEngine, RollbackOutcome,
};
use tempfile::TempDir;

const TABLE: &str = "schema_migrations";

fn write(dir: &Path, filename: &str, content: &str) {
    fs::write(dir.join(filename), content).unwrap();
}

fn engine_for(dir: &TempDir) -> MigrationEngine {
    MigrationEngine::new(MigrationConfig::new(dir.path(), TABLE)).unwrap()
}

async fn memory() -> SqliteConnection {
    SqliteConnection::connect("sqlite::memory:", None).await.unwrap()
}

async fn table_exists(conn: &mut SqliteConnection, table: &str) -> bool {
    let rows = conn
        .fetch_all(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[table.into()],
        )
        .await
        .unwrap();
    !rows.is_empty()
}

async fn applied_names(engine: &MigrationEngine, conn: &mut SqliteConnection) -> Vec<String> {
    engine
        .list(conn)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.name)
        .collect()
}

#[tokio::test]
async fn apply_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-users-up.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);");
    write(dir.path(), "0002-posts-up.sql", "CREATE TABLE posts (id INTEGER PRIMARY KEY);\nCREATE INDEX posts_id ON posts (id);");

    let engine = engine_for(&dir);
    let mut conn = memory().await;

    let first = engine.apply(&mut conn).await.unwrap();
    assert_eq!(first.applied_count(), 2);
    assert_eq!(first.skipped, 0);
    let before = engine.list(&mut conn).await.unwrap();

    let second = engine.apply(&mut conn).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(second.skipped, 2);
    assert_eq!(engine.list(&mut conn).await.unwrap(), before);
}

#[tokio::test]
async fn recorded_hash_matches_up_script() {
    let dir = TempDir::new().unwrap();
    let users = "CREATE TABLE users (id INTEGER PRIMARY KEY);";
    let posts = "CREATE TABLE posts (id INTEGER PRIMARY KEY);\n";
    write(dir.path(), "0001-users-up.sql", users);
    write(dir.path(), "0002-posts-up.sql", posts);

    let engine = engine_for(&dir);
    let mut conn = memory().await;
    engine.apply(&mut conn).await.unwrap();

    let records = engine.list(&mut conn).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].hash, hash_script(users));
    assert_eq!(records[1].hash, hash_script(posts));
    assert!(records.iter().all(|r| r.hash.len() == 64));
}

#[tokio::test]
async fn only_unrecorded_migrations_execute() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER);");
    write(dir.path(), "0002-b-up.sql", "CREATE TABLE b (id INTEGER);");

    let engine = engine_for(&dir);
    let mut conn = memory().await;
    engine.store().ensure_table(&mut conn).await.unwrap();
    engine
        .store()
        .record_applied(&mut conn, "0002-b", &hash_script("CREATE TABLE b (id INTEGER);"))
        .await
        .unwrap();

    let report = engine.apply(&mut conn).await.unwrap();

    let executed: Vec<_> = report.applied.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(executed, vec!["0001-a"]);
    assert!(table_exists(&mut conn, "a").await);
    assert!(!table_exists(&mut conn, "b").await);
}

#[tokio::test]
async fn failing_script_halts_apply() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER);");
    write(dir.path(), "0002-b-up.sql", "CREATE TABLE b (id INTEGER;");
    write(dir.path(), "0003-c-up.sql", "CREATE TABLE c (id INTEGER);");

    let engine = engine_for(&dir);
    let mut conn = memory().await;

    let err = engine.apply(&mut conn).await.unwrap_err();
    assert_eq!(err.migration_name(), Some("0002-b"));
    assert!(matches!(err, MigrateError::MigrationFailed { .. }));

    assert_eq!(applied_names(&engine, &mut conn).await, vec!["0001-a"]);
    assert!(table_exists(&mut conn, "a").await);
    assert!(!table_exists(&mut conn, "c").await);
}

#[tokio::test]
async fn rollback_on_empty_table_is_noop() {
    let dir = TempDir::new().unwrap();
    let engine = engine_for(&dir);
    let mut conn = memory().await;

    let outcome = engine.rollback(&mut conn, None).await.unwrap();
    assert_eq!(outcome, RollbackOutcome::NothingToRollBack);
}

#[tokio::test]
async fn rollback_named_removes_only_that_record() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER);");
    write(dir.path(), "0001-a-down.sql", "DROP TABLE a;");
    write(dir.path(), "0002-b-up.sql", "CREATE TABLE b (id INTEGER);");
    write(dir.path(), "0002-b-down.sql", "DROP TABLE b;");
    write(dir.path(), "0003-c-up.sql", "CREATE TABLE c (id INTEGER);");

    let engine = engine_for(&dir);
    let mut conn = memory().await;
    engine.apply(&mut conn).await.unwrap();

    let outcome = engine.rollback(&mut conn, Some("0001-a")).await.unwrap();

    assert_eq!(outcome, RollbackOutcome::RolledBack { name: "0001-a".to_string() });
    assert_eq!(applied_names(&engine, &mut conn).await, vec!["0002-b", "0003-c"]);
    assert!(!table_exists(&mut conn, "a").await);
    assert!(table_exists(&mut conn, "b").await);
}

#[tokio::test]
async fn rollback_without_down_script_keeps_record() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER);");

    let engine = engine_for(&dir);
    let mut conn = memory().await;
    engine.apply(&mut conn).await.unwrap();

    let outcome = engine.rollback(&mut conn, None).await.unwrap();

    match outcome {
        RollbackOutcome::Skipped { name, reason } => {
            assert_eq!(name, "0001-a");
            assert!(reason.contains("0001-a-down.sql"), "reason: {}", reason);
        }
        other => panic!("expected Skipped, got {:?}", other),
    }
    assert_eq!(applied_names(&engine, &mut conn).await, vec!["0001-a"]);
    assert!(table_exists(&mut conn, "a").await);
}

#[tokio::test]
async fn list_and_rollback_follow_applied_at_not_id() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "b-down.sql", "SELECT 1;");

    let engine = engine_for(&dir);
    let mut conn = memory().await;
    engine.store().ensure_table(&mut conn).await.unwrap();

    let hash = "0".repeat(64);
    conn.execute_script(&format!(
        "INSERT INTO {table} (id, name, hash, applied_at) VALUES (1, 'b', '{hash}', '2024-01-02 00:00:00.000');
         INSERT INTO {table} (id, name, hash, applied_at) VALUES (2, 'a', '{hash}', '2024-01-01 00:00:00.000');",
        table = TABLE,
        hash = hash
    ))
    .await
    .unwrap();

    assert_eq!(applied_names(&engine, &mut conn).await, vec!["a", "b"]);

    let outcome = engine.rollback(&mut conn, None).await.unwrap();
    assert_eq!(outcome, RollbackOutcome::RolledBack { name: "b".to_string() });
    assert_eq!(applied_names(&engine, &mut conn).await, vec!["a"]);
}

#[tokio::test]
async fn drift_is_rejected_only_when_verifying() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER);");

    let mut conn = memory().await;
    engine_for(&dir).apply(&mut conn).await.unwrap();

    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER, name TEXT);");
    write(dir.path(), "0002-b-up.sql", "CREATE TABLE b (id INTEGER);");

    let verifying = MigrationEngine::new(
        MigrationConfig::new(dir.path(), TABLE).with_verify_checksums(true),
    )
    .unwrap();
    let err = verifying.apply(&mut conn).await.unwrap_err();
    match err {
        MigrateError::Drift { name, recorded, current } => {
            assert_eq!(name, "0001-a");
            assert_eq!(recorded, hash_script("CREATE TABLE a (id INTEGER);"));
            assert_eq!(current, hash_script("CREATE TABLE a (id INTEGER, name TEXT);"));
        }
        other => panic!("expected Drift, got {:?}", other),
    }
    assert!(!table_exists(&mut conn, "b").await);

    let report = engine_for(&dir).apply(&mut conn).await.unwrap();
    let executed: Vec<_> = report.applied.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(executed, vec!["0002-b"]);
}

#[tokio::test]
async fn create_writes_pair_then_refuses_collision() {
    let dir = TempDir::new().unwrap();
    let engine = engine_for(&dir);

    let created = engine.create("add_posts").unwrap();
    assert!(created.base_name.ends_with("-add_posts"));
    assert_eq!(created.base_name.len(), "20240101000000-add_posts".len());
    assert!(!fs::read_to_string(&created.up_path).unwrap().is_empty());
    assert!(!fs::read_to_string(&created.down_path).unwrap().is_empty());

    let now = chrono::Utc::now();
    engine.catalog().create_pair_at("twice", now).unwrap();
    let err = engine.catalog().create_pair_at("twice", now).unwrap_err();
    assert!(matches!(err, MigrateError::AlreadyExists { .. }));
}

#[tokio::test]
async fn connect_picks_backend_from_url() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER);");

    let config = MigrationConfig::new(dir.path(), TABLE);
    let settings = DatabaseSettings::new("sqlite::memory:");
    let engine = MigrationEngine::new(config.clone()).unwrap();

    let mut conn = backends::connect(&settings, &config).await.unwrap();
    let report = engine.apply(conn.as_mut()).await.unwrap();
    let status = engine.status(conn.as_mut()).await.unwrap();
    conn.close().await.unwrap();

    assert_eq!(report.applied_count(), 1);
    assert_eq!(status.pending_count(), 0);
    assert!(status.orphaned.is_empty());
}

#[tokio::test]
async fn statement_timeout_surfaces_as_timeout() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "0001-a-up.sql", "CREATE TABLE a (id INTEGER);");

    let engine = engine_for(&dir);
    let mut conn = SqliteConnection::connect("sqlite::memory:", Some(Duration::ZERO))
        .await
        .unwrap();

    let err = engine.apply(&mut conn).await.unwrap_err();
    assert!(
        matches!(err, MigrateError::Timeout { seconds: 0, .. }),
        "unexpected error: {:?}",
        err
    );
}
