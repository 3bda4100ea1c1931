//! MySQL Backend Implementation
//!
//! Scripts go through the text protocol, which sqlx opens with multi-statement
//! support, so a migration file can hold several `;`-separated statements.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Executor, MySql, Row, TypeInfo};

use super::core::*;
use super::{with_timeout, DatabaseBackendType};
use crate::error::{MigrateError, MigrateResult};

/// MySQL / MariaDB connection
pub struct MySqlConnection {
    conn: sqlx::MySqlConnection,
    statement_timeout: Option<Duration>,
}

impl MySqlConnection {
    pub async fn connect(url: &str, statement_timeout: Option<Duration>) -> MigrateResult<Self> {
        let conn = sqlx::MySqlConnection::connect(url).await.map_err(|e| {
            MigrateError::Connection(format!("Failed to connect to MySQL: {}", e))
        })?;

        Ok(Self {
            conn,
            statement_timeout,
        })
    }
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        tracing::debug!(sql, params = params.len(), "mysql execute");
        let query = params.iter().fold(sqlx::query(sql), bind_database_value);
        let conn = &mut self.conn;

        with_timeout(self.statement_timeout, "execute", async move {
            let result = query.execute(conn).await?;
            Ok::<_, MigrateError>(result.rows_affected())
        })
        .await
    }

    async fn execute_script(&mut self, script: &str) -> MigrateResult<u64> {
        tracing::debug!(bytes = script.len(), "mysql execute script");
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
        tracing::debug!(sql, params = params.len(), "mysql fetch");
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
            .map_err(|e| MigrateError::Connection(format!("Failed to close MySQL connection: {}", e)))
    }
}

fn bind_database_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &DatabaseValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        DatabaseValue::Null => query.bind(None::<String>),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
    }
}

fn get<'r, T>(row: &'r MySqlRow, index: usize) -> MigrateResult<Option<T>>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get::<Option<T>, _>(index)
        .map_err(|e| MigrateError::Mapping(format!("Failed to decode column {}: {}", index, e)))
}

fn decode_row(row: &MySqlRow) -> MigrateResult<DatabaseRow> {
    let mut decoded = DatabaseRow::new();

    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "BOOLEAN" => get::<bool>(row, index)?.map(DatabaseValue::Bool),
            "TINYINT" | "SMALLINT" | "INT" | "MEDIUMINT" | "BIGINT" => {
                get::<i64>(row, index)?.map(DatabaseValue::Int64)
            }
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "INT UNSIGNED" | "MEDIUMINT UNSIGNED"
            | "BIGINT UNSIGNED" => match get::<u64>(row, index)? {
                Some(v) => Some(DatabaseValue::Int64(i64::try_from(v).map_err(|_| {
                    MigrateError::Mapping(format!("Column {} value {} exceeds i64", index, v))
                })?)),
                None => None,
            },
            "TIMESTAMP" => get::<DateTime<Utc>>(row, index)?.map(DatabaseValue::DateTime),
            "DATETIME" => get::<NaiveDateTime>(row, index)?
                .map(|v| DatabaseValue::DateTime(DateTime::from_naive_utc_and_offset(v, Utc))),
            _ => get::<String>(row, index)?.map(DatabaseValue::String),
        };

        decoded.push(column.name(), value.unwrap_or(DatabaseValue::Null));
    }

    Ok(decoded)
}
