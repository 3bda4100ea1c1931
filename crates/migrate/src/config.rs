//! Migration configuration
//!
//! Configuration is an explicit value handed to the engine. Nothing in this
//! crate reads process state except [`MigrationConfig::from_env`] and
//! [`DatabaseSettings::from_env`], which exist for the command line entry point.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backends::DatabaseBackendType;
use crate::security::validate_table_name;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Default extension of migration scripts
pub const DEFAULT_FILE_EXTENSION: &str = "sql";

/// Configuration for the migration engine
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory holding the `-up` / `-down` script pairs
    pub migrations_dir: PathBuf,
    /// Table used to track applied migrations
    pub tracking_table: String,
    /// Script file extension, without the leading dot
    pub file_extension: String,
    /// Reject `apply` when an applied migration's file no longer matches its hash
    pub verify_checksums: bool,
    /// Upper bound for establishing the database connection
    pub connect_timeout: Option<Duration>,
    /// Upper bound for every individual database call
    pub statement_timeout: Option<Duration>,
}

impl MigrationConfig {
    pub fn new(migrations_dir: impl Into<PathBuf>, tracking_table: impl Into<String>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            tracking_table: tracking_table.into(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            verify_checksums: false,
            connect_timeout: None,
            statement_timeout: None,
        }
    }

    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let migrations_dir = non_empty(&lookup, "MIGRATIONS_DIR").ok_or_else(|| {
            ConfigError::missing_required(
                "migrations_dir",
                "MIGRATIONS_DIR environment variable must be set",
            )
        })?;
        let tracking_table = non_empty(&lookup, "TRACKING_TABLE").ok_or_else(|| {
            ConfigError::missing_required(
                "tracking_table",
                "TRACKING_TABLE environment variable must be set",
            )
        })?;

        let mut config = Self::new(migrations_dir, tracking_table);

        if let Some(extension) = non_empty(&lookup, "MIGRATE_FILE_EXTENSION") {
            config.file_extension = extension;
        }

        if let Some(verify) = non_empty(&lookup, "MIGRATE_VERIFY_CHECKSUMS") {
            config.verify_checksums = parse_bool("verify_checksums", &verify)?;
        }

        config.statement_timeout = non_empty(&lookup, "MIGRATE_STATEMENT_TIMEOUT")
            .map(|value| parse_seconds("statement_timeout", &value))
            .transpose()?;
        config.connect_timeout = non_empty(&lookup, "MIGRATE_CONNECT_TIMEOUT")
            .map(|value| parse_seconds("connect_timeout", &value))
            .transpose()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migrations_dir.as_os_str().is_empty() {
            return Err(ConfigError::missing_required(
                "migrations_dir",
                "a migrations directory is required",
            ));
        }

        validate_table_name(&self.tracking_table)?;

        let extension = self.file_extension.as_str();
        if extension.is_empty()
            || extension.starts_with('.')
            || extension.contains(['/', '\\'])
        {
            return Err(ConfigError::invalid_value(
                "file_extension",
                extension,
                "a bare extension such as 'sql'",
            ));
        }

        // A zero timeout would fail every database call before it starts.
        for (field, timeout) in [
            ("statement_timeout", self.statement_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if let Some(timeout) = timeout.filter(|t| t.is_zero()) {
                return Err(ConfigError::invalid_value(
                    field,
                    format!("{}s", timeout.as_secs()),
                    "a positive number of seconds",
                ));
            }
        }

        Ok(())
    }

    /// Suffix identifying up scripts, e.g. `-up.sql`
    pub fn up_suffix(&self) -> String {
        format!("-up.{}", self.file_extension)
    }

    /// Suffix identifying down scripts, e.g. `-down.sql`
    pub fn down_suffix(&self) -> String {
        format!("-down.{}", self.file_extension)
    }
}

/// Where the target database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub url: String,
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Load database settings from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// `DATABASE_URL` wins; otherwise a MySQL URL is assembled from the
    /// discrete `DB_*` variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = match non_empty(&lookup, "DATABASE_URL") {
            Some(url) => Self::new(url),
            None => {
                let host = non_empty(&lookup, "DB_HOST").unwrap_or_else(|| "localhost".to_string());
                let user = non_empty(&lookup, "DB_USER").unwrap_or_else(|| "root".to_string());
                let password = lookup("DB_PASSWORD").unwrap_or_default();
                let database = non_empty(&lookup, "DB_NAME").unwrap_or_else(|| "test_db".to_string());
                let port = match non_empty(&lookup, "DB_PORT") {
                    Some(port) => port.parse::<u16>().map_err(|_| {
                        ConfigError::invalid_value("db_port", port, "valid port number (0-65535)")
                    })?,
                    None => 3306,
                };

                let mut url = url::Url::parse("mysql://localhost").map_err(|e| {
                    ConfigError::invalid_value("database_url", "mysql://localhost", e.to_string())
                })?;
                url.set_host(Some(&host))
                    .map_err(|e| ConfigError::invalid_value("db_host", host.as_str(), e.to_string()))?;
                // Setting credentials and port only fails for cannot-be-a-base URLs.
                let _ = url.set_username(&user);
                if !password.is_empty() {
                    let _ = url.set_password(Some(&password));
                }
                let _ = url.set_port(Some(port));
                url.set_path(&format!("/{}", database));

                Self::new(String::from(url))
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend_type().map(|_| ())
    }

    /// Backend selected by the URL scheme
    pub fn backend_type(&self) -> Result<DatabaseBackendType, ConfigError> {
        let scheme = self
            .url
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .unwrap_or_default();

        scheme.parse().map_err(|_| {
            ConfigError::invalid_value(
                "database_url",
                redact_url(&self.url),
                "a postgres://, mysql:// or sqlite: URL",
            )
        })
    }

    /// The URL with any password masked, for logging
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }
}

fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.into()
        }
        Ok(parsed) => parsed.into(),
        Err(_) => "<unparseable url>".to_string(),
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_value(field, value, "true or false")),
    }
}

fn parse_seconds(field: &str, value: &str) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(seconds) if seconds > 0 => Ok(Duration::from_secs(seconds)),
        _ => Err(ConfigError::invalid_value(field, value, "a positive number of seconds")),
    }
}
