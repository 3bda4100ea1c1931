//! PostgreSQL Backend Implementation
//!
//! Wraps a single `sqlx::PgConnection`. Scripts are sent without bind
//! parameters so PostgreSQL runs them through the simple query protocol, which
//! accepts several statements in one round-trip.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Executor, Postgres, Row, TypeInfo};

use super::core::*;
use super::{with_timeout, DatabaseBackendType};
use crate::error::{MigrateError, MigrateResult};

/// PostgreSQL connection
pub struct PostgresConnection {
    conn: sqlx::PgConnection,
    statement_timeout: Option<Duration>,
}

impl PostgresConnection {
    pub async fn connect(url: &str, statement_timeout: Option<Duration>) -> MigrateResult<Self> {
        let conn = sqlx::PgConnection::connect(url).await.map_err(|e| {
            MigrateError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
        })?;

        Ok(Self {
            conn,
            statement_timeout,
        })
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        tracing::debug!(sql, params = params.len(), "postgres execute");
        let query = params.iter().fold(sqlx::query(sql), bind_database_value);
        let conn = &mut self.conn;

        with_timeout(self.statement_timeout, "execute", async move {
            let result = query.execute(conn).await?;
            Ok::<_, MigrateError>(result.rows_affected())
        })
        .await
    }

    async fn execute_script(&mut self, script: &str) -> MigrateResult<u64> {
        tracing::debug!(bytes = script.len(), "postgres execute script");
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
        tracing::debug!(sql, params = params.len(), "postgres fetch");
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
            .map_err(|e| MigrateError::Connection(format!("Failed to close PostgreSQL connection: {}", e)))
    }
}

fn bind_database_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(None::<String>),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
    }
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> MigrateResult<Option<T>>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index)
        .map_err(|e| MigrateError::Mapping(format!("Failed to decode column {}: {}", index, e)))
}

fn decode_row(row: &PgRow) -> MigrateResult<DatabaseRow> {
    let mut decoded = DatabaseRow::new();

    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => get::<bool>(row, index)?.map(DatabaseValue::Bool),
            "INT2" => get::<i16>(row, index)?.map(|v| DatabaseValue::Int64(v.into())),
            "INT4" => get::<i32>(row, index)?.map(|v| DatabaseValue::Int64(v.into())),
            "INT8" => get::<i64>(row, index)?.map(DatabaseValue::Int64),
            "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, index)?.map(DatabaseValue::DateTime),
            "TIMESTAMP" => get::<NaiveDateTime>(row, index)?
                .map(|v| DatabaseValue::DateTime(DateTime::from_naive_utc_and_offset(v, Utc))),
            _ => get::<String>(row, index)?.map(DatabaseValue::String),
        };

        decoded.push(column.name(), value.unwrap_or(DatabaseValue::Null));
    }

    Ok(decoded)
}
