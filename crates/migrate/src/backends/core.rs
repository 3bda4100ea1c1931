//! Core Database Backend Traits
//!
//! These types keep sqlx out of the engine: statements go in as SQL text plus
//! [`DatabaseValue`] parameters, rows come back as [`DatabaseRow`]s that the
//! tracking store maps into typed records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DatabaseBackendType;
use crate::error::{MigrateError, MigrateResult};

/// A single connection to the target database
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Which database this connection talks to
    fn backend_type(&self) -> DatabaseBackendType;

    /// Execute one parameterized statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64>;

    /// Execute a raw script that may contain several statements
    async fn execute_script(&mut self, script: &str) -> MigrateResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Vec<DatabaseRow>>;

    /// Close the connection
    async fn close(self: Box<Self>) -> MigrateResult<()>;
}

/// Database value enumeration for parameter binding and row access
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

/// One result row, columns in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: DatabaseValue) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, value.into());
        self
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> MigrateResult<&DatabaseValue> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .map(|index| &self.values[index])
            .ok_or_else(|| MigrateError::Mapping(format!("Column '{}' not found", name)))
    }
}
