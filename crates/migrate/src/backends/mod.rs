//! Database Backend Abstractions
//!
//! The engine only ever talks to a [`DatabaseConnection`]: run a parameterized
//! statement, run a raw multi-statement script, fetch rows. Each supported
//! database gets a sqlx-backed implementation selected from the URL scheme.

pub mod core;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::future::Future;
use std::time::Duration;

pub use self::core::*;
pub use self::mysql::MySqlConnection;
pub use self::postgres::PostgresConnection;
pub use self::sqlite::SqliteConnection;

use crate::config::{DatabaseSettings, MigrationConfig};
use crate::error::{MigrateError, MigrateResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Positional bind placeholder, 1-based
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DatabaseBackendType::PostgreSQL => format!("${}", index),
            DatabaseBackendType::MySQL | DatabaseBackendType::SQLite => "?".to_string(),
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

/// Open a single connection for one engine run
///
/// The caller owns the returned connection and is expected to
/// [`close`](DatabaseConnection::close) it on every exit path.
pub async fn connect(
    settings: &DatabaseSettings,
    config: &MigrationConfig,
) -> MigrateResult<Box<dyn DatabaseConnection>> {
    let backend = settings.backend_type()?;
    tracing::debug!(
        backend = %backend,
        url = %settings.redacted_url(),
        "Opening database connection"
    );

    let statement_timeout = config.statement_timeout;
    let conn: Box<dyn DatabaseConnection> = match backend {
        DatabaseBackendType::PostgreSQL => Box::new(
            with_timeout(
                config.connect_timeout,
                "connect",
                PostgresConnection::connect(&settings.url, statement_timeout),
            )
            .await?,
        ),
        DatabaseBackendType::MySQL => Box::new(
            with_timeout(
                config.connect_timeout,
                "connect",
                MySqlConnection::connect(&settings.url, statement_timeout),
            )
            .await?,
        ),
        DatabaseBackendType::SQLite => Box::new(
            with_timeout(
                config.connect_timeout,
                "connect",
                SqliteConnection::connect(&settings.url, statement_timeout),
            )
            .await?,
        ),
    };

    Ok(conn)
}

/// Bound a database future by an optional timeout
pub(crate) async fn with_timeout<T, F>(
    timeout: Option<Duration>,
    operation: &str,
    fut: F,
) -> MigrateResult<T>
where
    F: Future<Output = MigrateResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| MigrateError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            })?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_scheme() {
        assert_eq!("postgres".parse::<DatabaseBackendType>(), Ok(DatabaseBackendType::PostgreSQL));
        assert_eq!("PostgreSQL".parse::<DatabaseBackendType>(), Ok(DatabaseBackendType::PostgreSQL));
        assert_eq!("mysql".parse::<DatabaseBackendType>(), Ok(DatabaseBackendType::MySQL));
        assert_eq!("sqlite".parse::<DatabaseBackendType>(), Ok(DatabaseBackendType::SQLite));
        assert!("oracle".parse::<DatabaseBackendType>().is_err());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(DatabaseBackendType::PostgreSQL.placeholder(2), "$2");
        assert_eq!(DatabaseBackendType::MySQL.placeholder(2), "?");
        assert_eq!(DatabaseBackendType::SQLite.placeholder(1), "?");
    }

    #[tokio::test]
    async fn test_timeout_expires() {
        let result: MigrateResult<()> = with_timeout(
            Some(Duration::from_millis(10)),
            "execute",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(MigrateError::Timeout { ref operation, .. }) if operation == "execute"));
    }

    #[tokio::test]
    async fn test_no_timeout_passes_through() {
        let result = with_timeout(None, "execute", async { Ok::<_, MigrateError>(7u64) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let settings = DatabaseSettings::new("sqlite::memory:");
        let config = MigrationConfig::new("./migrations", "schema_migrations");

        let mut conn = connect(&settings, &config).await.unwrap();
        assert_eq!(conn.backend_type(), DatabaseBackendType::SQLite);
        let rows = conn.fetch_all("SELECT 1 AS one", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        conn.close().await.unwrap();
    }
}
