//! SQLite Backend Implementation
//!
//! Mostly used for local development and for the test suite, where an
//! in-memory database (`sqlite::memory:`) stands in for a real server.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, Sqlite, TypeInfo};

use super::core::*;
use super::{with_timeout, DatabaseBackendType};
use crate::error::{MigrateError, MigrateResult};

/// SQLite connection
pub struct SqliteConnection {
    conn: sqlx::SqliteConnection,
    statement_timeout: Option<Duration>,
}

impl SqliteConnection {
    /// Connect, creating the database file when it does not exist yet
    pub async fn connect(url: &str, statement_timeout: Option<Duration>) -> MigrateResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MigrateError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);

        let conn = options.connect().await.map_err(|e| {
            MigrateError::Connection(format!("Failed to open SQLite database: {}", e))
        })?;

        Ok(Self {
            conn,
            statement_timeout,
        })
    }
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        tracing::debug!(sql, params = params.len(), "sqlite execute");
        let query = params.iter().fold(sqlx::query(sql), bind_database_value);
        let conn = &mut self.conn;

        with_timeout(self.statement_timeout, "execute", async move {
            let result = query.execute(conn).await?;
            Ok::<_, MigrateError>(result.rows_affected())
        })
        .await
    }

    async fn execute_script(&mut self, script: &str) -> MigrateResult<u64> {
        tracing::debug!(bytes = script.len(), "sqlite execute script");
        let conn = &mut self.conn;

        with_timeout(self.statement_timeout, "script", async move {
            let result = conn.execute(script).await?;
            Ok::<_, MigrateError>(result.rows_affected())
        })
        .await
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Vec<DatabaseRow>> {
        tracing::debug!(sql, params = params.len(), "sqlite fetch");
        let query = params.iter().fold(sqlx::query(sql), bind_database_value);
        let conn = &mut self.conn;

        let rows = with_timeout(self.statement_timeout, "fetch", async move {
            Ok::<_, MigrateError>(query.fetch_all(conn).await?)
        })
        .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| MigrateError::Connection(format!("Failed to close SQLite connection: {}", e)))
    }
}

fn bind_database_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &DatabaseValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        DatabaseValue::Null => query.bind(None::<String>),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
    }
}

fn get<'r, T>(row: &'r SqliteRow, index: usize) -> MigrateResult<Option<T>>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<Option<T>, _>(index)
        .map_err(|e| MigrateError::Mapping(format!("Failed to decode column {}: {}", index, e)))
}

fn decode_row(row: &SqliteRow) -> MigrateResult<DatabaseRow> {
    let mut decoded = DatabaseRow::new();

    for column in row.columns() {
        let index = column.ordinal();
        // SQLite typing is per value; fall back to text when the declared
        // type does not decode.
        let value = match column.type_info().name() {
            "NULL" => None,
            "BOOLEAN" => get::<bool>(row, index)?.map(DatabaseValue::Bool),
            "INTEGER" | "BIGINT" | "INT4" | "INT8" => get::<i64>(row, index)?.map(DatabaseValue::Int64),
            "DATETIME" => match get::<DateTime<Utc>>(row, index) {
                Ok(value) => value.map(DatabaseValue::DateTime),
                Err(_) => get::<String>(row, index)?.map(DatabaseValue::String),
            },
            _ => match get::<String>(row, index) {
                Ok(value) => value.map(DatabaseValue::String),
                Err(_) => get::<i64>(row, index)?.map(DatabaseValue::Int64),
            },
        };

        decoded.push(column.name(), value.unwrap_or(DatabaseValue::Null));
    }

    Ok(decoded)
}
