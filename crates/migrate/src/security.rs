//! Identifier validation for SQL that cannot be parameterized
//!
//! The tracking table name is interpolated into DDL and DML, so it is checked
//! once at configuration time instead of being escaped per backend.

use crate::config::ConfigError;

/// Characters allowed in SQL identifiers (alphanumeric, underscore)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

/// Keywords that cannot be used as a bare table name
static SQL_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "JOIN", "UNION", "DROP", "CREATE",
    "ALTER", "GRANT", "REVOKE", "TRUNCATE", "TABLE", "INDEX", "ORDER", "GROUP", "USER",
];

/// Validate a single identifier
///
/// PostgreSQL truncates identifiers longer than 63 bytes, so anything longer
/// is rejected rather than silently renamed.
pub fn validate_identifier(identifier: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| {
        Err(ConfigError::invalid_value(
            "tracking_table",
            identifier,
            reason.to_string(),
        ))
    };

    let Some(first) = identifier.chars().next() else {
        return invalid("a non-empty identifier");
    };

    if identifier.len() > 63 {
        return invalid("an identifier of at most 63 characters");
    }

    if identifier.chars().any(|c| !ALLOWED_IDENTIFIER_CHARS.contains(c)) {
        return invalid("only letters, digits and underscores");
    }

    if first.is_ascii_digit() {
        return invalid("an identifier that does not start with a digit");
    }

    if SQL_KEYWORDS.contains(&identifier.to_uppercase().as_str()) {
        return invalid("an identifier that is not a reserved SQL keyword");
    }

    Ok(())
}

/// Validate a table name, optionally schema-qualified (`schema.table`)
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    let mut parts = name.split('.');
    let (schema, table) = match (parts.next(), parts.next(), parts.next()) {
        (Some(table), None, None) => (None, table),
        (Some(schema), Some(table), None) => (Some(schema), table),
        _ => {
            return Err(ConfigError::invalid_value(
                "tracking_table",
                name,
                "'table' or 'schema.table'",
            ))
        }
    };

    if let Some(schema) = schema {
        validate_identifier(schema).map_err(|_| {
            ConfigError::invalid_value("tracking_table", name, "a valid schema identifier")
        })?;
    }

    validate_identifier(table).map_err(|err| match err {
        ConfigError::InvalidValue { expected, .. } => {
            ConfigError::invalid_value("tracking_table", name, expected)
        }
        other => other,
    })
}
